//! The IR (Intermediate Representation) instruction model.
//!
//! Modeled as a sum type over the twelve operations (Design Note: "Dynamic
//! typing -> tagged records"): once an [`Ir`] has been constructed, engine
//! dispatch is a single `match` over [`IrArgs`] rather than a string-keyed
//! lookup. The wire format is still the loose `{stage, op, target, args,
//! meta}` document the generators and test fixtures emit, so [`Ir`]
//! implements `Serialize`/`Deserialize` by hand over that shape.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "ENC")]
    Enc,
    #[serde(rename = "STO")]
    Sto,
    #[serde(rename = "RET")]
    Ret,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Enc => "ENC",
            Stage::Sto => "STO",
            Stage::Ret => "RET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Note,
    Event,
    Task,
    Profile,
    Preference,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relative {
    Last,
    Next,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
    pub relative: Option<Relative>,
    pub amount: Option<i64>,
    pub unit: Option<TimeUnit>,
}

impl TimeRange {
    /// True when either the absolute or the relative form is fully specified
    /// and the two forms are not mixed (matches `TimeRange._xor` in the
    /// Python reference).
    pub fn is_well_formed(&self) -> bool {
        let absolute = self.start.is_some() && self.end.is_some();
        let relative = self.relative.is_some() && self.amount.is_some() && self.unit.is_some();
        absolute ^ relative
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    pub has_tags: Option<Vec<String>>,
    pub not_tags: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub type_: Option<MemoryType>,
    pub time_range: Option<TimeRange>,
    pub subject: Option<String>,
    pub location: Option<String>,
    pub topic: Option<String>,
    pub weight_gte: Option<f64>,
    pub weight_lte: Option<f64>,
    pub expire_before: Option<String>,
    pub expire_after: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Intent {
    Query { query: String },
    Vector { vector: Vec<f32> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOverrides {
    pub k: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Search {
    pub intent: Intent,
    pub overrides: Option<SearchOverrides>,
    pub limit: Option<u32>,
}

/// `target.ids` may be a single id or a sequence of ids (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdsSpec {
    One(i64),
    Many(Vec<i64>),
}

impl IdsSpec {
    pub fn as_vec(&self) -> Vec<i64> {
        match self {
            IdsSpec::One(id) => vec![*id],
            IdsSpec::Many(ids) => ids.clone(),
        }
    }
}

/// A target selector: at least one of `ids`, `filter`, `search`, or `all` must
/// be present (spec.md §3 safety invariant on target).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    pub ids: Option<IdsSpec>,
    pub filter: Option<Filter>,
    pub search: Option<Search>,
    #[serde(default)]
    pub all: bool,
}

impl TargetSpec {
    pub fn has_selector(&self) -> bool {
        self.ids.is_some() || self.filter.is_some() || self.search.is_some() || self.all
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    pub actor: Option<String>,
    pub language: Option<String>,
    pub trace_id: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub confirmation: bool,
}

// ---------------------------------------------------------------------
// Per-operation argument shapes
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text { text: String },
    Url { url: String },
    Structured { structured: Value },
}

impl Payload {
    /// The "textified" form used to derive an embedding, matching the
    /// reference adapter's `text or json.dumps(structured)` fallback.
    pub fn textify(&self) -> String {
        match self {
            Payload::Text { text } => text.clone(),
            Payload::Url { url } => url.clone(),
            Payload::Structured { structured } => structured.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facets {
    pub subject: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPermLevel {
    Public,
    Team,
    Private,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePermLevel {
    Open,
    Maintainer,
    OwnerOnly,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionFields {
    pub read_perm_level: Option<ReadPermLevel>,
    pub write_perm_level: Option<WritePermLevel>,
    pub read_whitelist: Option<Vec<String>>,
    pub read_blacklist: Option<Vec<String>>,
    pub write_whitelist: Option<Vec<String>>,
    pub write_blacklist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeArgs {
    pub payload: Payload,
    #[serde(rename = "type")]
    pub type_: Option<MemoryType>,
    pub tags: Option<Vec<String>>,
    pub facets: Option<Facets>,
    pub time: Option<String>,
    pub subject: Option<String>,
    pub location: Option<String>,
    pub topic: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub skip_embedding: bool,
    pub auto_frequency: Option<String>,
    pub expire_at: Option<String>,
    pub next_auto_update_at: Option<String>,
    #[serde(flatten)]
    pub permissions: PermissionFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagPolicy {
    Replace,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelArgs {
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub tag_policy: Option<TagPolicy>,
    pub facets: Option<Facets>,
    #[serde(default)]
    pub auto_generate_tags: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSet {
    pub text: Option<String>,
    pub time: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<MemoryType>,
    pub weight: Option<f64>,
    pub subject: Option<String>,
    pub location: Option<String>,
    pub topic: Option<String>,
    pub facets: Option<Facets>,
    /// Present only so the validator can reject it explicitly; writing this
    /// field is a safety refusal (spec.md §4.5 Encode / §7).
    pub embedding: Option<Vec<f32>>,
    pub auto_frequency: Option<String>,
    pub expire_at: Option<String>,
    pub next_auto_update_at: Option<String>,
    #[serde(flatten)]
    pub permissions: PermissionFields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateArgs {
    pub set: UpdateSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeArgs {
    pub primary_id: Option<i64>,
    #[serde(default = "default_true")]
    pub soft_delete_children: bool,
    #[serde(default)]
    pub skip_reembedding: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Remind {
    pub rrule: Option<String>,
    pub expire_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromoteArgs {
    pub weight: Option<f64>,
    pub weight_delta: Option<f64>,
    pub remind: Option<Remind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemoteArgs {
    pub weight: Option<f64>,
    pub weight_delta: Option<f64>,
    #[serde(default)]
    pub archive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteArgs {
    #[serde(default = "default_true")]
    pub soft: bool,
    pub time_range: Option<TimeRange>,
    pub older_than: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveArgs {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeArgs {
    pub focus: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    256
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitLang {
    Zh,
    En,
    Auto,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BySentencesParams {
    pub lang: Option<SplitLang>,
    pub max_sentences: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ByChunksParams {
    pub chunk_size: Option<usize>,
    pub num_chunks: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomSplitParams {
    pub instruction: Option<String>,
    pub max_splits: Option<usize>,
    #[serde(default)]
    pub bypass_llm: bool,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategyName {
    BySentences,
    ByChunks,
    Custom,
}

/// Holds the params sub-object for whichever strategy was named; the
/// validator checks that the matching field is populated (spec.md §4.5
/// Split, three strategies sharing one wire shape:
/// `{strategy, params: {by_sentences|by_chunks|custom: {...}}}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitParams {
    pub by_sentences: Option<BySentencesParams>,
    pub by_chunks: Option<ByChunksParams>,
    pub custom: Option<CustomSplitParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitArgs {
    pub strategy: SplitStrategyName,
    #[serde(default)]
    pub params: SplitParams,
    #[serde(default = "default_true")]
    pub inherit_all: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    ReadOnly,
    AppendOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockArgs {
    pub mode: LockMode,
    pub reason: Option<String>,
    pub policy: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireAction {
    SoftDelete,
    HardDelete,
    Demote,
    Anonymize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpireArgs {
    pub ttl: Option<String>,
    pub until: Option<String>,
    #[serde(default = "default_expire_action")]
    pub on_expire: ExpireAction,
}

fn default_expire_action() -> ExpireAction {
    ExpireAction::SoftDelete
}

/// Sum type over the twelve operations. Constructing an [`Ir`] resolves the
/// wire-level `op: String` discriminant into this enum exactly once; engine
/// dispatch afterward is a single `match`, never a string comparison again.
#[derive(Debug, Clone)]
pub enum IrArgs {
    Encode(EncodeArgs),
    Label(LabelArgs),
    Update(UpdateArgs),
    Merge(MergeArgs),
    Promote(PromoteArgs),
    Demote(DemoteArgs),
    Delete(DeleteArgs),
    Retrieve(RetrieveArgs),
    Summarize(SummarizeArgs),
    Split(SplitArgs),
    Lock(LockArgs),
    Expire(ExpireArgs),
}

impl IrArgs {
    pub fn op_name(&self) -> &'static str {
        match self {
            IrArgs::Encode(_) => "Encode",
            IrArgs::Label(_) => "Label",
            IrArgs::Update(_) => "Update",
            IrArgs::Merge(_) => "Merge",
            IrArgs::Promote(_) => "Promote",
            IrArgs::Demote(_) => "Demote",
            IrArgs::Delete(_) => "Delete",
            IrArgs::Retrieve(_) => "Retrieve",
            IrArgs::Summarize(_) => "Summarize",
            IrArgs::Split(_) => "Split",
            IrArgs::Lock(_) => "Lock",
            IrArgs::Expire(_) => "Expire",
        }
    }

    /// The stage this operation is required to run in (spec.md §3
    /// "Stage<->op binding").
    pub fn required_stage(&self) -> Stage {
        match self {
            IrArgs::Encode(_) => Stage::Enc,
            IrArgs::Retrieve(_) | IrArgs::Summarize(_) => Stage::Ret,
            _ => Stage::Sto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ir {
    pub stage: Stage,
    pub target: Option<TargetSpec>,
    pub args: IrArgs,
    pub meta: Option<Meta>,
}

/// Wire shape: `op` lives next to `args`, not inside it, so building an
/// [`Ir`] means reading `op` first and using it to pick which struct to
/// deserialize `args` into. Serde alone can't express "sibling field picks
/// the shape of this field", so [`Ir`] implements `Serialize`/`Deserialize`
/// by hand over this shadow struct rather than forcing the enum-with-tag
/// machinery to do it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IrWire {
    stage: Stage,
    op: String,
    #[serde(default)]
    target: Option<TargetSpec>,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    meta: Option<Meta>,
}

impl Ir {
    pub fn op_name(&self) -> &'static str {
        self.args.op_name()
    }

    /// Parse a raw JSON document (as produced by Stage 2 generation or a test
    /// fixture) into a typed [`Ir`], without performing semantic validation —
    /// callers run [`crate::validate::validate_ir`] afterward.
    pub fn from_value(value: Value) -> Result<Self> {
        let wire: IrWire = serde_json::from_value(value)?;
        let args = match wire.op.as_str() {
            "Encode" => IrArgs::Encode(serde_json::from_value(wire.args)?),
            "Label" => IrArgs::Label(serde_json::from_value(wire.args)?),
            "Update" => IrArgs::Update(serde_json::from_value(wire.args)?),
            "Merge" => IrArgs::Merge(serde_json::from_value(wire.args)?),
            "Promote" => IrArgs::Promote(serde_json::from_value(wire.args)?),
            "Demote" => IrArgs::Demote(serde_json::from_value(wire.args)?),
            "Delete" => IrArgs::Delete(serde_json::from_value(wire.args)?),
            "Retrieve" => IrArgs::Retrieve(serde_json::from_value(wire.args)?),
            "Summarize" => IrArgs::Summarize(serde_json::from_value(wire.args)?),
            "Split" => IrArgs::Split(serde_json::from_value(wire.args)?),
            "Lock" => IrArgs::Lock(serde_json::from_value(wire.args)?),
            "Expire" => IrArgs::Expire(serde_json::from_value(wire.args)?),
            other => {
                return Err(Error::validation("op", format!("unknown operation '{other}'")))
            }
        };
        Ok(Ir {
            stage: wire.stage,
            target: wire.target,
            args,
            meta: wire.meta,
        })
    }

    pub fn to_value(&self) -> Result<Value> {
        let args = match &self.args {
            IrArgs::Encode(a) => serde_json::to_value(a)?,
            IrArgs::Label(a) => serde_json::to_value(a)?,
            IrArgs::Update(a) => serde_json::to_value(a)?,
            IrArgs::Merge(a) => serde_json::to_value(a)?,
            IrArgs::Promote(a) => serde_json::to_value(a)?,
            IrArgs::Demote(a) => serde_json::to_value(a)?,
            IrArgs::Delete(a) => serde_json::to_value(a)?,
            IrArgs::Retrieve(a) => serde_json::to_value(a)?,
            IrArgs::Summarize(a) => serde_json::to_value(a)?,
            IrArgs::Split(a) => serde_json::to_value(a)?,
            IrArgs::Lock(a) => serde_json::to_value(a)?,
            IrArgs::Expire(a) => serde_json::to_value(a)?,
        };
        let wire = IrWire {
            stage: self.stage,
            op: self.op_name().to_string(),
            target: self.target.clone(),
            args,
            meta: self.meta.clone(),
        };
        serde_json::to_value(wire).map_err(Error::from)
    }
}

impl Serialize for Ir {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ir {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ir::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Flat key/value map occasionally needed when an operation (e.g. Lock's
/// `policy`) is intentionally left schema-loose per spec.md.
pub type LooseMap = HashMap<String, Value>;
