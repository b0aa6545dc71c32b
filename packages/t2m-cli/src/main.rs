//! `t2m-bench`: a thin binary wiring the library crates together.
//!
//! Full argument parsing, plan/catalog file loading, report formatting, and
//! `benchmarks/latest` symlink maintenance are external-collaborator concerns
//! this workspace leaves out (spec.md §1 Non-goals) — this binary exists so
//! the workspace has a runnable entry point and a smoke check that the crate
//! graph links and a sample actually evaluates end to end.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use t2m_bench::{BenchConfig, TestRunner};
use t2m_core::ir::Ir;
use t2m_core::sample::{Classification, Expected, GenerationSample, InstructionType, Structure};
use t2m_providers::ProviderFactory;

#[derive(Parser, Debug)]
#[command(name = "t2m-bench")]
#[command(about = "Benchmark construction and evaluation pipeline for the T2M IR", long_about = None)]
struct Args {
    /// Print the resolved `BenchConfig` (from the `TEXT2MEM_*` environment) and exit.
    #[arg(long)]
    print_config: bool,

    /// Run a single in-memory Encode/Retrieve sample against the configured
    /// providers, as a smoke check that the pipeline is wired correctly.
    #[arg(long)]
    smoke_test: bool,
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = BenchConfig::from_env();

    if args.print_config {
        println!("{config:#?}");
        return Ok(());
    }

    if args.smoke_test {
        run_smoke_test(&config).await?;
        return Ok(());
    }

    println!("t2m-bench {}: pass --smoke-test or --print-config", env!("CARGO_PKG_VERSION"));
    Ok(())
}

async fn run_smoke_test(config: &BenchConfig) -> Result<()> {
    let embedder = ProviderFactory::embedding_from_env();
    let generator = ProviderFactory::generation_from_env();
    let embedding_is_mock = config.embedding_provider.as_deref().unwrap_or("mock") == "mock";

    let runner = TestRunner::new(embedder, generator, embedding_is_mock, config.eval_timeout);

    let encode = Ir::from_value(serde_json::json!({
        "stage": "ENC", "op": "Encode",
        "args": {"payload": {"text": "the quarterly report is due friday"}, "tags": ["work"]}
    }))?;

    let sample = GenerationSample {
        id: "t2m-en-direct-single-enc-001".into(),
        classification: Classification {
            lang: "en".into(),
            instruction_type: InstructionType::Direct,
            structure: Structure::Single,
        },
        nl: std::collections::HashMap::from([("en".into(), "remember the report deadline".into())]),
        prerequisites: vec![],
        schema_list: vec![encode],
        init_db: None,
        expected: Expected {
            assertions: vec![t2m_core::sample::AssertionSpec {
                name: "has_one_memory".into(),
                select: t2m_core::sample::AssertionSelect {
                    from: "memory".into(),
                    where_clauses: vec!["deleted=0".into()],
                    agg: "count".into(),
                },
                expect: t2m_core::sample::AssertionExpect {
                    op: t2m_core::sample::CompareOp::Ge,
                    value: serde_json::json!(1),
                },
                params: std::collections::HashMap::new(),
            }],
            ranking: None,
            triggers: vec![],
            meta: None,
        },
        notes: None,
    };

    let outcome = runner.run_sample(&sample).await?;
    info!(passed = outcome.passed, duration_ms = outcome.duration_ms, "smoke test finished");
    println!("smoke test: {}", if outcome.passed { "PASSED" } else { "FAILED" });
    if !outcome.passed {
        println!("{:#?}", outcome.errors);
        std::process::exit(1);
    }
    Ok(())
}
