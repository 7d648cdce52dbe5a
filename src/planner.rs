//! Query vs. Scan planning.
//!
//! Tries each candidate index against the predicate set and takes the first
//! (or best, by the tie-break rules below) that can serve the request as a
//! `Query`, falling back to a table `Scan` when none can.

use crate::error::PlannerError;
use crate::expr::Operator;
use crate::registry::{IndexSchema, Metadata};

/// Whether a plan will issue a `Query` (against the base table or a named
/// index) or fall back to a full `Scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Query,
    Scan,
}

/// Sort direction for `OrderBy`, honored only on `Query`'s target sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One predicate supplied via `.where(...)`/`.filter(...)`.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
}

/// The chosen plan: which index (if any) to query, and whether the caller's
/// `OrderBy`/`ConsistentRead` requests are honored.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub mode: AccessMode,
    /// `None` means the base table.
    pub index_name: Option<String>,
    pub scan_forward: bool,
    pub consistent_read: bool,
}

/// Inputs accumulated by a query builder before planning.
pub struct PlanRequest<'a> {
    pub predicates: &'a [Predicate],
    pub index_hint: Option<&'a str>,
    pub order_by: Option<(&'a str, SortDirection)>,
    pub consistent_read: bool,
}

struct Candidate<'a> {
    index_name: Option<&'a str>,
    pk_field: &'a str,
    sk_field: Option<&'a str>,
}

fn candidates(metadata: &Metadata) -> Vec<Candidate<'_>> {
    let mut out = vec![Candidate {
        index_name: None,
        pk_field: metadata.pk_field().name,
        sk_field: metadata.sk_field().map(|f| f.name),
    }];
    for idx in &metadata.indexes {
        out.push(Candidate {
            index_name: Some(&idx.name),
            pk_field: metadata.fields[idx.pk_field].name,
            sk_field: idx.sk_field.map(|i| metadata.fields[i].name),
        });
    }
    out
}

fn predicate_for<'a>(predicates: &'a [Predicate], field: &str) -> Option<&'a Predicate> {
    predicates.iter().find(|p| p.field == field)
}

/// Whether `candidate` can serve every predicate as a Query: the pk field
/// must be used with `=`, the sk field (if used) with a
/// sort-key-eligible operator, and everything else must be filter-eligible
/// (anything not consumed by pk/sk is always filter-eligible in this model).
fn candidate_satisfies(candidate: &Candidate, predicates: &[Predicate]) -> bool {
    let Some(pk_pred) = predicate_for(predicates, candidate.pk_field) else {
        return false;
    };
    if pk_pred.operator != Operator::Eq {
        return false;
    }
    if let Some(sk_field) = candidate.sk_field {
        if let Some(sk_pred) = predicate_for(predicates, sk_field) {
            if !sk_pred.operator.is_sort_key_eligible() {
                return false;
            }
        }
    }
    true
}

fn projection_coverage(candidate: &Candidate, predicates: &[Predicate]) -> usize {
    let mut count = 1;
    if candidate.sk_field.map(|f| predicate_for(predicates, f).is_some()) == Some(true) {
        count += 1;
    }
    count
}

/// Chooses an access mode and target index for the given predicates.
pub fn plan_query(
    metadata: &Metadata,
    request: PlanRequest,
) -> Result<QueryPlan, PlannerError> {
    if let Some(hint) = request.index_hint {
        let index = metadata
            .index(hint)
            .map(|idx: &IndexSchema| Candidate {
                index_name: Some(idx.name.as_ref()),
                pk_field: metadata.fields[idx.pk_field].name,
                sk_field: idx.sk_field.map(|i| metadata.fields[i].name),
            })
            .or_else(|| {
                (hint == metadata.table_name.as_str() || hint == "base").then(|| Candidate {
                    index_name: None,
                    pk_field: metadata.pk_field().name,
                    sk_field: metadata.sk_field().map(|f| f.name),
                })
            });

        let Some(candidate) = index else {
            return Err(PlannerError::IndexNotUsable(
                hint.to_string(),
                "no such index".to_string(),
            ));
        };

        if predicate_for(request.predicates, candidate.pk_field)
            .map(|p| p.operator == Operator::Eq)
            != Some(true)
        {
            return Err(PlannerError::IndexNotUsable(
                hint.to_string(),
                "predicates do not satisfy this index's partition key".to_string(),
            ));
        }

        return Ok(finalize_plan(candidate, request));
    }

    let mut qualifying: Vec<Candidate> = candidates(metadata)
        .into_iter()
        .filter(|c| candidate_satisfies(c, request.predicates))
        .collect();

    if qualifying.is_empty() {
        log::warn!(
            "no index satisfies the given predicates for `{}`; falling back to Scan",
            metadata.type_name
        );
        return Ok(QueryPlan {
            mode: AccessMode::Scan,
            index_name: None,
            scan_forward: true,
            consistent_read: false,
        });
    }

    qualifying.sort_by(|a, b| {
        let base_a = a.index_name.is_none();
        let base_b = b.index_name.is_none();
        base_b
            .cmp(&base_a)
            .then_with(|| {
                projection_coverage(b, request.predicates)
                    .cmp(&projection_coverage(a, request.predicates))
            })
            .then_with(|| {
                let sk_a = a.sk_field.map(|f| predicate_for(request.predicates, f).is_some());
                let sk_b = b.sk_field.map(|f| predicate_for(request.predicates, f).is_some());
                sk_b.unwrap_or(false).cmp(&sk_a.unwrap_or(false))
            })
            .then_with(|| a.index_name.unwrap_or("").cmp(b.index_name.unwrap_or("")))
    });

    Ok(finalize_plan(qualifying.remove(0), request))
}

fn finalize_plan(candidate: Candidate, request: PlanRequest) -> QueryPlan {
    let is_base = candidate.index_name.is_none();

    let scan_forward = match request.order_by {
        Some((field, dir)) if Some(field) == candidate.sk_field => {
            !matches!(dir, SortDirection::Descending)
        }
        _ => true,
    };

    QueryPlan {
        mode: AccessMode::Query,
        index_name: candidate.index_name.map(str::to_string),
        scan_forward,
        consistent_read: request.consistent_read && is_base,
    }
}
