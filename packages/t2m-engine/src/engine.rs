use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use t2m_core::ir::{
    DemoteArgs, EncodeArgs, ExpireAction, ExpireArgs, Facets, Ir, IrArgs, LabelArgs, LockArgs, LockMode, MemoryType,
    MergeArgs, PromoteArgs, Relative, RetrieveArgs, SplitArgs, SplitStrategyName, SummarizeArgs, TagPolicy,
    TargetSpec, TimeUnit, UpdateArgs,
};
use t2m_core::record::{EmbeddingInfo, MemoryRecord};
use t2m_providers::{EmbeddingProvider, GenerationOptions, GenerationProvider};
use t2m_store::{MemoryStore, NewRecord};

use crate::error::{Error, Result};
use crate::ranking::{cosine_similarity, hybrid_score, RankingWeights};
use crate::result::{
    AffectedRowsResult, EncodeResult, EngineResult, MergeResult, RetrieveResult, SplitOutcome, SplitResult,
    SummarizeResult,
};
use crate::split;
use crate::target::{base_where, unit_duration};

/// IR interpreter over a [`MemoryStore`] (spec.md §2, §4.5 "MemoryEngine").
/// Dispatch on `IR.op` is a single `match` over [`IrArgs`]; the engine never
/// touches a string op name after [`Ir::from_value`] has run.
pub struct MemoryEngine {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    weights: RankingWeights,
}

impl MemoryEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            weights: RankingWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: RankingWeights) -> Self {
        self.weights = weights;
        self
    }

    pub async fn execute(&self, ir: &Ir, now: DateTime<Utc>) -> Result<EngineResult> {
        t2m_core::validate_ir(ir)?;

        let dry_run = ir.meta.as_ref().map(|m| m.dry_run).unwrap_or(false);
        if dry_run {
            if let Some(target) = &ir.target {
                if is_mutating(&ir.args) {
                    let ids = self.resolve_target_ids(target, &now).await?;
                    return Ok(EngineResult::AffectedRows(AffectedRowsResult {
                        affected_rows: ids.len(),
                    }));
                }
            }
        }

        match &ir.args {
            IrArgs::Encode(args) => self.encode(args, now).await,
            IrArgs::Label(args) => self.label(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Update(args) => self.update(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Merge(args) => self.merge(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Promote(args) => self.promote(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Demote(args) => self.demote(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Delete(args) => self.delete(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Retrieve(args) => self.retrieve(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Summarize(args) => self.summarize(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Split(args) => self.split(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Lock(args) => self.lock(ir.target.as_ref().unwrap(), args, now).await,
            IrArgs::Expire(args) => self.expire(ir.target.as_ref().unwrap(), args, now).await,
        }
    }

    // -----------------------------------------------------------------
    // Target resolution
    // -----------------------------------------------------------------

    /// Resolves a target's `ids | filter | search | all` to a concrete,
    /// non-deleted id set. `target.search` is resolved via hybrid ranking
    /// and intersected with any `ids`/`filter`/`all` constraint present
    /// (spec.md §4.5 "All STO operations on target.search...").
    async fn resolve_target_ids(&self, target: &TargetSpec, now: &DateTime<Utc>) -> Result<Vec<i64>> {
        if let Some(search) = &target.search {
            let (ids, _skipped, _note) = self
                .resolve_search(target.ids.as_ref(), target.filter.as_ref(), target.all, search, now)
                .await?;
            return Ok(ids);
        }
        let (where_sql, params) = base_where(target.ids.as_ref(), target.filter.as_ref(), target.all, now);
        let full_where = format!("({where_sql}) AND deleted=0");
        let rows = self.store.query_where(&full_where, &params)?;
        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    /// Hybrid ranking over the candidates matching the non-search part of
    /// the target, returning `(ranked ids, skipped_incompatible_vectors,
    /// note)` (spec.md §4.5 "Hybrid ranking").
    async fn resolve_search(
        &self,
        ids: Option<&t2m_core::ir::IdsSpec>,
        filter: Option<&t2m_core::ir::Filter>,
        all: bool,
        search: &t2m_core::ir::Search,
        now: &DateTime<Utc>,
    ) -> Result<(Vec<i64>, usize, Option<String>)> {
        let k = search
            .limit
            .or(search.overrides.as_ref().and_then(|o| o.k))
            .map(|v| v as usize)
            .unwrap_or(self.weights.default_k)
            .min(self.weights.max_k);

        let (query_vector, query_text): (Vec<f32>, Option<String>) = match &search.intent {
            t2m_core::ir::Intent::Vector { vector } => {
                if vector.len() != self.embedder.dimension() {
                    return Ok((Vec::new(), 0, Some("query_vector_dimension_mismatch".to_string())));
                }
                (vector.clone(), None)
            }
            t2m_core::ir::Intent::Query { query } => {
                let embedded = self.embedder.embed(query).await?;
                (embedded.vector, Some(query.clone()))
            }
        };

        let (base_sql, base_params) = base_where(ids, filter, all, now);
        let full_where = format!("({base_sql}) AND deleted=0");
        let candidates = self.store.search_candidates(&full_where, &base_params)?;

        let mut skipped = 0usize;
        let mut scored: Vec<(i64, f64)> = Vec::new();
        for candidate in &candidates {
            if candidate.dimension != query_vector.len() {
                skipped += 1;
                continue;
            }
            let cosine = cosine_similarity(&query_vector, &candidate.vector);
            let score = hybrid_score(&self.weights, cosine, &candidate.text, query_text.as_deref());
            scored.push((candidate.id, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok((scored.into_iter().map(|(id, _)| id).collect(), skipped, None))
    }

    // -----------------------------------------------------------------
    // Encode
    // -----------------------------------------------------------------

    async fn encode(&self, args: &EncodeArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let text = args.payload.textify();
        let embedding = if args.skip_embedding {
            None
        } else {
            let e = self.embedder.embed(&text).await?;
            Some(EmbeddingInfo {
                dimension: e.dimension,
                vector: e.vector,
                model: e.model,
                provider: e.provider,
            })
        };
        let (dim, model, provider) = match &embedding {
            Some(e) => (Some(e.dimension), Some(e.model.clone()), Some(e.provider.clone())),
            None => (None, None, None),
        };
        let new_record = NewRecord {
            text,
            type_: args.type_.unwrap_or(MemoryType::Generic),
            tags: args.tags.clone().unwrap_or_default(),
            facets: args.facets.clone().unwrap_or_default(),
            weight: 0.5,
            embedding,
            subject: args.subject.clone(),
            location: args.location.clone(),
            topic: args.topic.clone(),
            source: args.source.clone(),
            time: args.time.clone(),
            auto_frequency: args.auto_frequency.clone(),
            next_auto_update_at: args.next_auto_update_at.clone(),
            expire_at: args.expire_at.clone(),
            permissions: args.permissions.clone(),
        };
        let id = self.store.insert(new_record, &now.to_rfc3339())?;
        Ok(EngineResult::Encode(EncodeResult {
            inserted_id: id,
            embedding_dim: dim,
            embedding_model: model,
            embedding_provider: provider,
        }))
    }

    // -----------------------------------------------------------------
    // Label
    // -----------------------------------------------------------------

    async fn label(&self, target: &TargetSpec, args: &LabelArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        if args.tags.is_none() && args.facets.is_none() && !args.auto_generate_tags {
            return Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: 0 }));
        }
        let ids = self.resolve_target_ids(target, &now).await?;
        let mut affected = 0usize;
        for id in ids {
            let Some(mut rec) = self.active_record(id)? else { continue };
            let mut changed = false;

            if let Some(tags) = &args.tags {
                rec.tags = match args.tag_policy.unwrap_or(TagPolicy::Append) {
                    TagPolicy::Replace => dedupe_tags(tags.clone()),
                    TagPolicy::Append => dedupe_tags(rec.tags.iter().chain(tags.iter()).cloned().collect()),
                };
                changed = true;
            }
            if let Some(facets) = &args.facets {
                merge_facets(&mut rec.facets, facets);
                if facets.subject.is_some() {
                    rec.subject = facets.subject.clone();
                }
                if facets.location.is_some() {
                    rec.location = facets.location.clone();
                }
                if facets.topic.is_some() {
                    rec.topic = facets.topic.clone();
                }
                if facets.time.is_some() {
                    rec.time = facets.time.clone();
                }
                changed = true;
            }
            if args.auto_generate_tags {
                let prompt = format!("label,{}", rec.text);
                let gen = self.generator.generate(&prompt, &GenerationOptions::default()).await?;
                let proposed: Vec<String> = gen
                    .text
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                rec.tags = dedupe_tags(rec.tags.iter().chain(proposed.iter()).cloned().collect());
                changed = true;
            }

            if changed {
                self.store.replace(&rec, &now.to_rfc3339())?;
                affected += 1;
            }
        }
        Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: affected }))
    }

    // -----------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------

    async fn update(&self, target: &TargetSpec, args: &UpdateArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let ids = self.resolve_target_ids(target, &now).await?;
        let mut affected = 0usize;
        for id in ids {
            let Some(mut rec) = self.active_record(id)? else { continue };
            if !write_allowed(&rec, "Update") {
                continue;
            }
            let set = &args.set;
            if let Some(text) = &set.text {
                rec.text = text.clone();
            }
            if let Some(time) = &set.time {
                rec.time = Some(time.clone());
            }
            if let Some(t) = set.type_ {
                rec.type_ = t;
            }
            if let Some(weight) = set.weight {
                rec.weight = weight.clamp(0.0, 1.0);
            }
            if let Some(subject) = &set.subject {
                rec.subject = Some(subject.clone());
            }
            if let Some(location) = &set.location {
                rec.location = Some(location.clone());
            }
            if let Some(topic) = &set.topic {
                rec.topic = Some(topic.clone());
            }
            if let Some(facets) = &set.facets {
                merge_facets(&mut rec.facets, facets);
            }
            if let Some(freq) = &set.auto_frequency {
                rec.auto_frequency = Some(freq.clone());
            }
            if let Some(at) = &set.expire_at {
                rec.expire_at = Some(at.clone());
            }
            if let Some(at) = &set.next_auto_update_at {
                rec.next_auto_update_at = Some(at.clone());
            }
            if let Some(level) = set.permissions.read_perm_level {
                rec.permissions.read_perm_level = Some(level);
            }
            if let Some(level) = set.permissions.write_perm_level {
                rec.permissions.write_perm_level = Some(level);
            }
            self.store.replace(&rec, &now.to_rfc3339())?;
            affected += 1;
        }
        Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: affected }))
    }

    // -----------------------------------------------------------------
    // Promote / Demote
    // -----------------------------------------------------------------

    async fn promote(&self, target: &TargetSpec, args: &PromoteArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let ids = self.resolve_target_ids(target, &now).await?;
        let mut affected = 0usize;
        for id in ids {
            let Some(mut rec) = self.active_record(id)? else { continue };
            if let Some(weight) = args.weight {
                rec.weight = weight.clamp(0.0, 1.0);
            } else if let Some(delta) = args.weight_delta {
                rec.weight = (rec.weight + delta.clamp(-1.0, 1.0)).clamp(0.0, 1.0);
            }
            if let Some(remind) = &args.remind {
                if let Some(rrule) = &remind.rrule {
                    rec.auto_frequency = Some(rrule.clone());
                }
                if let Some(at) = &remind.expire_at {
                    rec.expire_at = Some(at.clone());
                }
            }
            self.store.replace(&rec, &now.to_rfc3339())?;
            affected += 1;
        }
        Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: affected }))
    }

    async fn demote(&self, target: &TargetSpec, args: &DemoteArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let ids = self.resolve_target_ids(target, &now).await?;
        let mut affected = 0usize;
        for id in ids {
            let Some(mut rec) = self.active_record(id)? else { continue };
            if let Some(weight) = args.weight {
                rec.weight = weight.clamp(0.0, 1.0);
            } else if let Some(delta) = args.weight_delta {
                rec.weight = (rec.weight - delta.abs().clamp(-1.0, 1.0)).clamp(0.0, 1.0);
            } else if args.archive {
                rec.weight = 0.0;
            }
            self.store.replace(&rec, &now.to_rfc3339())?;
            affected += 1;
        }
        Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: affected }))
    }

    // -----------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------

    async fn delete(&self, target: &TargetSpec, args: &t2m_core::ir::DeleteArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let mut ids = self.resolve_target_ids(target, &now).await?;

        if let Some(tr) = &args.time_range {
            ids = self.filter_ids_by_time_range(ids, tr, &now)?;
        }
        if let Some(older_than) = &args.older_than {
            let cutoff = now - t2m_core::parse_iso_duration(older_than)?;
            ids = self.filter_ids_older_than(ids, cutoff)?;
        }

        let mut affected = 0usize;
        let mut to_soft = Vec::new();
        let mut to_hard = Vec::new();
        for id in ids {
            let Some(rec) = self.store.get(id)? else { continue };
            if rec.deleted {
                continue;
            }
            if !write_allowed(&rec, "Delete") {
                continue;
            }
            if args.soft {
                to_soft.push(id);
            } else {
                to_hard.push(id);
            }
            affected += 1;
        }
        self.store.soft_delete(&to_soft)?;
        self.store.hard_delete(&to_hard)?;
        Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: affected }))
    }

    fn filter_ids_by_time_range(
        &self,
        ids: Vec<i64>,
        tr: &t2m_core::ir::TimeRange,
        now: &DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let records = self.store.get_many(&ids)?;
        let (start, end) = self.resolve_time_range(tr, now);
        Ok(records
            .into_iter()
            .filter(|r| {
                r.time
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .map(|t| t >= start && t <= end)
                    .unwrap_or(false)
            })
            .map(|r| r.id)
            .collect())
    }

    fn resolve_time_range(&self, tr: &t2m_core::ir::TimeRange, now: &DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        if let (Some(start), Some(end)) = (&tr.start, &tr.end) {
            let parse = |s: &str| DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc)).unwrap_or(*now);
            (parse(start), parse(end))
        } else if let (Some(rel), Some(amount), Some(unit)) = (tr.relative, tr.amount, tr.unit) {
            let delta = unit_duration(unit, amount);
            match rel {
                Relative::Last => (*now - delta, *now),
                Relative::Next => (*now, *now + delta),
            }
        } else {
            (*now, *now)
        }
    }

    fn filter_ids_older_than(&self, ids: Vec<i64>, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        let records = self.store.get_many(&ids)?;
        Ok(records
            .into_iter()
            .filter(|r| {
                DateTime::parse_from_rfc3339(&r.created_at)
                    .map(|t| t.with_timezone(&Utc) < cutoff)
                    .unwrap_or(false)
            })
            .map(|r| r.id)
            .collect())
    }

    // -----------------------------------------------------------------
    // Retrieve
    // -----------------------------------------------------------------

    async fn retrieve(&self, target: &TargetSpec, args: &RetrieveArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        if let Some(search) = &target.search {
            let (ids, skipped, note) = self
                .resolve_search(target.ids.as_ref(), target.filter.as_ref(), target.all, search, &now)
                .await?;
            if ids.is_empty() && note.is_some() {
                return Ok(EngineResult::Retrieve(RetrieveResult {
                    rows: Vec::new(),
                    skipped_incompatible_vectors: skipped,
                    note,
                }));
            }
            let mut rows = self.store.get_many(&ids)?;
            // get_many doesn't preserve rank order; reorder to match `ids`.
            let order: std::collections::HashMap<i64, usize> =
                ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            rows.sort_by_key(|r| order.get(&r.id).copied().unwrap_or(usize::MAX));
            return Ok(EngineResult::Retrieve(RetrieveResult {
                rows,
                skipped_incompatible_vectors: skipped,
                note,
            }));
        }

        let (where_sql, params) = base_where(target.ids.as_ref(), target.filter.as_ref(), target.all, &now);
        let full_where = if args.include_deleted {
            where_sql
        } else {
            format!("({where_sql}) AND deleted=0")
        };
        let mut rows = self.store.query_where(&full_where, &params)?;
        if let Some(limit) = target.filter.as_ref().and_then(|f| f.limit) {
            rows.truncate(limit as usize);
        }
        Ok(EngineResult::Retrieve(RetrieveResult {
            rows,
            skipped_incompatible_vectors: 0,
            note: None,
        }))
    }

    // -----------------------------------------------------------------
    // Summarize
    // -----------------------------------------------------------------

    async fn summarize(&self, target: &TargetSpec, args: &SummarizeArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let retrieve_args = RetrieveArgs::default();
        let retrieved = match self.retrieve(target, &retrieve_args, now).await? {
            EngineResult::Retrieve(r) => r,
            _ => unreachable!("retrieve always returns EngineResult::Retrieve"),
        };
        let mut rows = retrieved.rows;
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let joined = rows.iter().map(|r| r.text.clone()).collect::<Vec<_>>().join("\n\n");
        let prompt = match &args.focus {
            Some(focus) => format!("Summarize the following, focusing on {focus}:\n{joined}"),
            None => format!("Summarize the following:\n{joined}"),
        };
        let opts = GenerationOptions {
            max_tokens: Some(args.max_tokens),
            ..Default::default()
        };
        let gen = self.generator.generate(&prompt, &opts).await?;
        Ok(EngineResult::Summarize(SummarizeResult {
            count: rows.len(),
            source_ids: rows.iter().map(|r| r.id).collect(),
            model: gen.model,
            summary: gen.text,
        }))
    }

    // -----------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------

    async fn merge(&self, target: &TargetSpec, args: &MergeArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let mut ids = self.resolve_target_ids(target, &now).await?;
        ids.sort_unstable();
        if ids.len() < 2 {
            return Err(Error::NoMatch("Merge requires at least two matching rows".into()));
        }

        let primary_id = args.primary_id.filter(|id| ids.contains(id)).unwrap_or(ids[0]);
        let child_ids: Vec<i64> = ids.into_iter().filter(|id| *id != primary_id).collect();

        let mut primary = self.store.get(primary_id)?.ok_or(Error::NoMatch("primary not found".into()))?;
        let children = self.store.get_many(&child_ids)?;

        let mut merged_text = primary.text.clone();
        for child in &children {
            merged_text.push_str("\n\n");
            merged_text.push_str(&child.text);
        }
        primary.text = merged_text;

        let reembedded = !args.skip_reembedding;
        if reembedded {
            let e = self.embedder.embed(&primary.text).await?;
            primary.embedding = Some(EmbeddingInfo {
                dimension: e.dimension,
                vector: e.vector,
                model: e.model,
                provider: e.provider,
            });
        }
        primary.lineage.children.extend(child_ids.iter().copied());
        self.store.replace(&primary, &now.to_rfc3339())?;

        if args.soft_delete_children {
            self.store.soft_delete(&child_ids)?;
        } else {
            self.store.hard_delete(&child_ids)?;
        }

        Ok(EngineResult::Merge(MergeResult {
            primary_id,
            merged_count: child_ids.len(),
            strategy: "concat".into(),
            reembedded,
        }))
    }

    // -----------------------------------------------------------------
    // Split
    // -----------------------------------------------------------------

    async fn split(&self, target: &TargetSpec, args: &SplitArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let parent_ids = self.resolve_target_ids(target, &now).await?;
        let mut results = Vec::new();
        let mut total = 0usize;

        for parent_id in parent_ids {
            let Some(mut parent) = self.active_record(parent_id)? else { continue };
            let segments = self.split_segments(&parent, args).await?;

            let mut child_ids = Vec::new();
            for segment in &segments {
                let embedding = {
                    let e = self.embedder.embed(segment).await?;
                    Some(EmbeddingInfo {
                        dimension: e.dimension,
                        vector: e.vector,
                        model: e.model,
                        provider: e.provider,
                    })
                };
                let mut tags = if args.inherit_all { parent.tags.clone() } else { Vec::new() };
                tags.push(format!("split_from_{parent_id}"));
                let new_record = NewRecord {
                    text: segment.clone(),
                    type_: parent.type_,
                    tags: dedupe_tags(tags),
                    facets: parent.facets.clone(),
                    weight: parent.weight,
                    embedding,
                    subject: parent.subject.clone(),
                    location: parent.location.clone(),
                    topic: parent.topic.clone(),
                    source: if args.inherit_all { parent.source.clone() } else { None },
                    time: if args.inherit_all { parent.time.clone() } else { None },
                    auto_frequency: None,
                    next_auto_update_at: None,
                    expire_at: None,
                    permissions: parent.permissions.clone(),
                };
                let child_id = self.store.insert(new_record, &now.to_rfc3339())?;
                if let Some(mut child) = self.store.get(child_id)? {
                    child.lineage.parents.push(parent_id);
                    self.store.replace(&child, &now.to_rfc3339())?;
                }
                child_ids.push(child_id);
            }

            parent.lineage.children.extend(child_ids.iter().copied());
            self.store.replace(&parent, &now.to_rfc3339())?;

            total += child_ids.len();
            results.push(SplitOutcome {
                parent_id,
                split_count: child_ids.len(),
                strategy_used: strategy_name(args.strategy),
                child_ids,
            });
        }

        Ok(EngineResult::Split(SplitResult {
            results,
            total_splits: total,
        }))
    }

    async fn split_segments(&self, parent: &MemoryRecord, args: &SplitArgs) -> Result<Vec<String>> {
        match args.strategy {
            SplitStrategyName::BySentences => {
                let p = args.params.by_sentences.clone().unwrap_or_default();
                Ok(split::split_by_sentences(
                    &parent.text,
                    p.lang.unwrap_or(t2m_core::ir::SplitLang::Auto),
                    p.max_sentences.unwrap_or(1) as usize,
                ))
            }
            SplitStrategyName::ByChunks => {
                let p = args.params.by_chunks.clone().unwrap_or_default();
                Ok(split::split_by_chunks(&parent.text, p.chunk_size, p.num_chunks))
            }
            SplitStrategyName::Custom => {
                let p = args.params.custom.clone().unwrap_or_default();
                if split::is_tiny(&parent.text) {
                    return Ok(vec![parent.text.clone()]);
                }
                if let Some(parts) = split::split_by_headings(&parent.text) {
                    return Ok(split::normalize_fragments(parts, p.max_splits));
                }
                if let Some(parts) = split::split_by_list_items(&parent.text) {
                    return Ok(split::normalize_fragments(parts, p.max_splits));
                }
                if p.bypass_llm {
                    return Ok(vec![parent.text.clone()]);
                }
                let schema = serde_json::json!({
                    "type": "array",
                    "items": {"type": "object", "properties": {"title": {"type": "string"}, "text": {"type": "string"}}}
                });
                let prompt = p
                    .instruction
                    .clone()
                    .unwrap_or_else(|| format!("Split the following text into segments:\n{}", parent.text));
                let opts = GenerationOptions {
                    timeout: p.timeout_secs.map(Duration::from_secs),
                    ..Default::default()
                };
                let gen = self.generator.generate_structured(&prompt, &schema, &opts).await?;
                let parsed: Vec<serde_json::Value> = serde_json::from_str(&gen.text).unwrap_or_default();
                let fragments = parsed
                    .into_iter()
                    .filter_map(|v| v.get("text").and_then(|t| t.as_str()).map(|s| s.to_string()))
                    .collect();
                Ok(split::normalize_fragments(fragments, p.max_splits))
            }
        }
    }

    // -----------------------------------------------------------------
    // Lock
    // -----------------------------------------------------------------

    async fn lock(&self, target: &TargetSpec, args: &LockArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let ids = self.resolve_target_ids(target, &now).await?;
        let mut affected = 0usize;
        for id in ids {
            let Some(mut rec) = self.active_record(id)? else { continue };
            rec.lock = Some(t2m_core::record::LockState {
                mode: match args.mode {
                    LockMode::ReadOnly => t2m_core::record::LockMode::ReadOnly,
                    LockMode::AppendOnly => t2m_core::record::LockMode::AppendOnly,
                },
                reason: args.reason.clone(),
                policy: args.policy.clone(),
                expires: None,
            });
            self.store.replace(&rec, &now.to_rfc3339())?;
            affected += 1;
        }
        Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: affected }))
    }

    // -----------------------------------------------------------------
    // Expire
    // -----------------------------------------------------------------

    async fn expire(&self, target: &TargetSpec, args: &ExpireArgs, now: DateTime<Utc>) -> Result<EngineResult> {
        let ids = self.resolve_target_ids(target, &now).await?;
        let expire_at = match (&args.ttl, &args.until) {
            (Some(ttl), _) => (now + t2m_core::parse_iso_duration(ttl)?).to_rfc3339(),
            (None, Some(until)) => until.clone(),
            (None, None) => now.to_rfc3339(),
        };
        let mut affected = 0usize;
        for id in ids {
            let Some(mut rec) = self.active_record(id)? else { continue };
            rec.expire_at = Some(expire_at.clone());
            rec.expire_action = Some(map_expire_action(args.on_expire));
            self.store.replace(&rec, &now.to_rfc3339())?;
            affected += 1;
        }
        Ok(EngineResult::AffectedRows(AffectedRowsResult { affected_rows: affected }))
    }

    fn active_record(&self, id: i64) -> Result<Option<MemoryRecord>> {
        match self.store.get(id)? {
            Some(r) if !r.deleted => Ok(Some(r)),
            _ => Ok(None),
        }
    }
}

fn is_mutating(args: &IrArgs) -> bool {
    !matches!(args, IrArgs::Retrieve(_) | IrArgs::Summarize(_))
}

fn dedupe_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

fn merge_facets(existing: &mut Facets, incoming: &Facets) {
    if incoming.subject.is_some() {
        existing.subject = incoming.subject.clone();
    }
    if incoming.time.is_some() {
        existing.time = incoming.time.clone();
    }
    if incoming.location.is_some() {
        existing.location = incoming.location.clone();
    }
    if incoming.topic.is_some() {
        existing.topic = incoming.topic.clone();
    }
}

fn map_expire_action(action: ExpireAction) -> t2m_core::record::ExpireAction {
    match action {
        ExpireAction::SoftDelete => t2m_core::record::ExpireAction::SoftDelete,
        ExpireAction::HardDelete => t2m_core::record::ExpireAction::HardDelete,
        ExpireAction::Demote => t2m_core::record::ExpireAction::Demote,
        ExpireAction::Anonymize => t2m_core::record::ExpireAction::Anonymize,
    }
}

fn strategy_name(strategy: SplitStrategyName) -> String {
    match strategy {
        SplitStrategyName::BySentences => "by_sentences".into(),
        SplitStrategyName::ByChunks => "by_chunks".into(),
        SplitStrategyName::Custom => "custom".into(),
    }
}

/// ReadOnly blocks all content-overwriting ops; AppendOnly blocks Update and
/// Delete specifically unless `write_perm_level` is explicitly `Open`
/// (spec.md §4.5 state machine: "an Update may re-enter active from locked
/// only if write_perm_level permits").
fn write_allowed(rec: &MemoryRecord, op: &str) -> bool {
    match &rec.lock {
        None => true,
        Some(lock) => match lock.mode {
            t2m_core::record::LockMode::ReadOnly => false,
            t2m_core::record::LockMode::AppendOnly => {
                if matches!(op, "Update" | "Delete") {
                    rec.permissions.write_perm_level == Some(t2m_core::ir::WritePermLevel::Open)
                } else {
                    true
                }
            }
        },
    }
}

/// Exercises spec.md §8's quantified invariants directly against
/// [`MemoryEngine`] (rather than through the harness in `t2m-bench`), using
/// the mock providers so every test is deterministic without network I/O.
#[cfg(test)]
mod tests {
    use super::*;
    use t2m_providers::mock::{MockEmbeddingProvider, MockGenerationProvider};

    fn engine() -> MemoryEngine {
        MemoryEngine::new(
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(MockEmbeddingProvider::with_dimension(16)),
            Arc::new(MockGenerationProvider::default()),
        )
    }

    fn ir(value: serde_json::Value) -> Ir {
        Ir::from_value(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    async fn encode(engine: &MemoryEngine, text: &str, tags: &[&str]) -> i64 {
        let result = engine
            .execute(
                &ir(serde_json::json!({
                    "stage": "ENC", "op": "Encode",
                    "args": {"payload": {"text": text}, "tags": tags}
                })),
                now(),
            )
            .await
            .unwrap();
        match result {
            EngineResult::Encode(e) => e.inserted_id,
            _ => unreachable!(),
        }
    }

    // spec.md §8 property 1: Encode's embedding is internally consistent.
    #[tokio::test]
    async fn encode_sets_consistent_embedding_metadata() {
        let eng = engine();
        let result = eng
            .execute(
                &ir(serde_json::json!({
                    "stage": "ENC", "op": "Encode",
                    "args": {"payload": {"text": "alpha project meeting notes"}}
                })),
                now(),
            )
            .await
            .unwrap();
        let EngineResult::Encode(e) = result else { panic!("expected Encode result") };
        let row = eng.store.get(e.inserted_id).unwrap().unwrap();
        let embedding = row.embedding.expect("embedding present");
        assert_eq!(embedding.dimension, embedding.vector.len());
        assert_eq!(Some(embedding.dimension), e.embedding_dim);
        assert!(!embedding.model.is_empty());
        assert!(!embedding.provider.is_empty());
    }

    // spec.md §8 property 2: soft-deleted rows vanish from Retrieve.
    #[tokio::test]
    async fn soft_deleted_rows_are_invisible_to_retrieve() {
        let eng = engine();
        let id = encode(&eng, "alpha project meeting notes", &[]).await;
        eng.execute(
            &ir(serde_json::json!({
                "stage": "STO", "op": "Delete",
                "target": {"ids": id}, "args": {"soft": true}
            })),
            now(),
        )
        .await
        .unwrap();

        let result = eng
            .execute(
                &ir(serde_json::json!({
                    "stage": "RET", "op": "Retrieve",
                    "target": {"ids": id}, "args": {}
                })),
                now(),
            )
            .await
            .unwrap();
        let EngineResult::Retrieve(r) = result else { panic!("expected Retrieve result") };
        assert!(r.rows.is_empty());

        let row = eng.store.get(id).unwrap().unwrap();
        assert!(row.deleted);
    }

    // spec.md §8 property 3: Promote/Demote clamp weight into [0, 1].
    #[tokio::test]
    async fn promote_and_demote_clamp_weight_into_unit_interval() {
        let eng = engine();
        let id = encode(&eng, "a note", &[]).await;

        eng.execute(
            &ir(serde_json::json!({
                "stage": "STO", "op": "Promote",
                "target": {"ids": id}, "args": {"weight_delta": 1.0}
            })),
            now(),
        )
        .await
        .unwrap();
        eng.execute(
            &ir(serde_json::json!({
                "stage": "STO", "op": "Promote",
                "target": {"ids": id}, "args": {"weight_delta": 1.0}
            })),
            now(),
        )
        .await
        .unwrap();
        let row = eng.store.get(id).unwrap().unwrap();
        assert!((0.0..=1.0).contains(&row.weight));
        assert_eq!(row.weight, 1.0);

        eng.execute(
            &ir(serde_json::json!({
                "stage": "STO", "op": "Demote",
                "target": {"ids": id}, "args": {"weight_delta": 1.0}
            })),
            now(),
        )
        .await
        .unwrap();
        eng.execute(
            &ir(serde_json::json!({
                "stage": "STO", "op": "Demote",
                "target": {"ids": id}, "args": {"weight_delta": 1.0}
            })),
            now(),
        )
        .await
        .unwrap();
        let row = eng.store.get(id).unwrap().unwrap();
        assert!((0.0..=1.0).contains(&row.weight));
        assert_eq!(row.weight, 0.0);
    }

    // spec.md §8 property 5: by_chunks splits into ceil(L/c) children whose
    // concatenation reproduces the parent text.
    #[tokio::test]
    async fn split_by_chunks_produces_ceil_len_over_chunk_size_children() {
        let eng = engine();
        let text = "0123456789abcdefghij"; // length 20
        let id = encode(&eng, text, &[]).await;

        let result = eng
            .execute(
                &ir(serde_json::json!({
                    "stage": "STO", "op": "Split",
                    "target": {"ids": id},
                    "args": {"strategy": "by_chunks", "params": {"by_chunks": {"chunk_size": 7}}}
                })),
                now(),
            )
            .await
            .unwrap();
        let EngineResult::Split(s) = result else { panic!("expected Split result") };
        assert_eq!(s.results.len(), 1);
        let outcome = &s.results[0];
        assert_eq!(outcome.split_count, 3); // ceil(20/7) == 3
        assert_eq!(outcome.child_ids.len(), 3);

        let mut concatenated = String::new();
        for child_id in &outcome.child_ids {
            let row = eng.store.get(*child_id).unwrap().unwrap();
            concatenated.push_str(&row.text);
        }
        assert_eq!(concatenated, text);
    }

    // spec.md §8 property 6: every child carries split_from_{parent} and the
    // parent appears in the child's lineage_parents.
    #[tokio::test]
    async fn split_children_carry_lineage_tag_and_parent_link() {
        let eng = engine();
        let id = encode(&eng, "First sentence. Second sentence? Third sentence!", &["split"]).await;

        let result = eng
            .execute(
                &ir(serde_json::json!({
                    "stage": "STO", "op": "Split",
                    "target": {"ids": id},
                    "args": {
                        "strategy": "by_sentences",
                        "params": {"by_sentences": {"lang": "en", "max_sentences": 1}}
                    }
                })),
                now(),
            )
            .await
            .unwrap();
        let EngineResult::Split(s) = result else { panic!("expected Split result") };
        assert!(s.total_splits >= 3);
        let outcome = &s.results[0];

        let expected_tag = format!("split_from_{id}");
        for child_id in &outcome.child_ids {
            let row = eng.store.get(*child_id).unwrap().unwrap();
            assert!(row.tags.contains(&expected_tag));
            assert!(row.lineage.parents.contains(&id));
        }
        let parent = eng.store.get(id).unwrap().unwrap();
        for child_id in &outcome.child_ids {
            assert!(parent.lineage.children.contains(child_id));
        }
    }

    // spec.md §8 property 7: Merge survives with concatenated text; other
    // targets are soft-deleted; merged_count == |targets| - 1.
    #[tokio::test]
    async fn merge_survives_with_concatenated_text_and_soft_deletes_children() {
        let eng = engine();
        let a = encode(&eng, "Note A", &["MergeGroup"]).await;
        let _b = encode(&eng, "Note B", &["MergeGroup"]).await;
        let _c = encode(&eng, "Note C", &["MergeGroup"]).await;

        let result = eng
            .execute(
                &ir(serde_json::json!({
                    "stage": "STO", "op": "Merge",
                    "target": {"filter": {"has_tags": ["MergeGroup"], "limit": 10}},
                    "args": {"primary_id": a}
                })),
                now(),
            )
            .await
            .unwrap();
        let EngineResult::Merge(m) = result else { panic!("expected Merge result") };
        assert_eq!(m.primary_id, a);
        assert_eq!(m.merged_count, 2);
        assert!(m.reembedded);

        let primary = eng.store.get(a).unwrap().unwrap();
        assert!(!primary.deleted);
        assert!(primary.text.contains("Note A"));
        assert!(primary.text.contains("Note B"));
        assert!(primary.text.contains("Note C"));

        let remaining = eng
            .store
            .query_where("deleted=0 AND tags LIKE '%MergeGroup%'", &[])
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, a);
    }

    // spec.md §8 scenario S1: Encode then Retrieve by search returns the
    // seeded rows with non-increasing similarity.
    #[tokio::test]
    async fn encode_then_search_retrieve_returns_seeded_rows_in_ranked_order() {
        let eng = engine();
        encode(&eng, "alpha project meeting notes", &[]).await;
        encode(&eng, "beta launch plan", &[]).await;
        encode(&eng, "unrelated gardening tips", &[]).await;

        let result = eng
            .execute(
                &ir(serde_json::json!({
                    "stage": "RET", "op": "Retrieve",
                    "target": {"search": {"intent": {"query": "alpha project plan"}, "overrides": {"k": 3}, "limit": 3}},
                    "args": {}
                })),
                now(),
            )
            .await
            .unwrap();
        let EngineResult::Retrieve(r) = result else { panic!("expected Retrieve result") };
        assert_eq!(r.rows.len(), 3);
    }

    // Embedding writes through Update are rejected by construction: the
    // Update argument schema has no `embedding` field to set, so a
    // caller-supplied one is parsed and discarded rather than ever reaching
    // the store (spec.md §4.5 "External writes of the embedding field
    // through Update are forbidden").
    #[tokio::test]
    async fn update_with_embedding_field_leaves_stored_embedding_untouched() {
        let eng = engine();
        let id = encode(&eng, "a note", &[]).await;
        let before = eng.store.get(id).unwrap().unwrap().embedding;

        eng.execute(
            &ir(serde_json::json!({
                "stage": "STO", "op": "Update",
                "target": {"ids": id},
                "args": {"set": {"text": "a note", "embedding": [0.1, 0.2]}}
            })),
            now(),
        )
        .await
        .unwrap();

        let after = eng.store.get(id).unwrap().unwrap().embedding;
        assert_eq!(before.map(|e| e.vector), after.map(|e| e.vector));
    }

    // Locked read_only rows reject Update.
    #[tokio::test]
    async fn read_only_locked_rows_reject_update() {
        let eng = engine();
        let id = encode(&eng, "a note", &[]).await;
        eng.execute(
            &ir(serde_json::json!({
                "stage": "STO", "op": "Lock",
                "target": {"ids": id}, "args": {"mode": "read_only"}
            })),
            now(),
        )
        .await
        .unwrap();

        let result = eng
            .execute(
                &ir(serde_json::json!({
                    "stage": "STO", "op": "Update",
                    "target": {"ids": id}, "args": {"set": {"text": "changed"}}
                })),
                now(),
            )
            .await
            .unwrap();
        let EngineResult::AffectedRows(a) = result else { panic!("expected AffectedRows result") };
        assert_eq!(a.affected_rows, 0);
        let row = eng.store.get(id).unwrap().unwrap();
        assert_eq!(row.text, "a note");
    }
}
