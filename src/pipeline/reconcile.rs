//! Multi-page reconciliation: fold per-page field maps into one record.
//!
//! The reconciler is a pure function of its inputs. Page results are sorted
//! by page index before merging, so the order in which concurrent calls
//! finished never changes the outcome, and running it twice on the same
//! inputs yields identical records.

use crate::config::MergeMode;
use crate::output::{
    CandidateRecord, ExtractionStats, FieldMap, PageFailure, PageResult, RecordStatus, TokenUsage,
};
use crate::pipeline::parse::is_placeholder;
use crate::schema::FieldSchema;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Merges page results under one [`MergeMode`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    mode: MergeMode,
    sentinel: String,
}

impl Reconciler {
    pub fn new(mode: MergeMode, sentinel: impl Into<String>) -> Self {
        Self {
            mode,
            sentinel: sentinel.into(),
        }
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Build the record for `document` from its page results.
    ///
    /// Every schema key is present in the result. Fields no page resolved are
    /// unknown. Failed pages contribute only to `failures` and `stats`.
    pub fn reconcile(&self, document: &str, schema: &FieldSchema, pages: &[PageResult]) -> CandidateRecord {
        let mut ordered: Vec<&PageResult> = pages.iter().collect();
        ordered.sort_by_key(|p| p.page_index);

        let mut fields = FieldMap::with_capacity(schema.len());
        let mut sources = IndexMap::new();

        for key in schema.keys() {
            match self.pick(key, &ordered) {
                Some((value, page_num)) => {
                    fields.insert(key.to_string(), Some(value.to_string()));
                    sources.insert(key.to_string(), page_num);
                }
                None => {
                    fields.insert(key.to_string(), None);
                }
            }
        }

        let failures: Vec<PageFailure> = ordered
            .iter()
            .filter_map(|p| {
                p.error().map(|e| PageFailure {
                    page: p.page_num(),
                    reason: e.to_string(),
                    raw_response: e.raw_response().map(str::to_string),
                })
            })
            .collect();

        let mut usage = TokenUsage::default();
        for page in &ordered {
            usage += page.usage;
        }

        let total_pages = ordered.len();
        let failed_pages = failures.len();
        let extracted_pages = total_pages - failed_pages;
        let contributing_pages = sources.values().collect::<HashSet<_>>().len();

        let status = if total_pages == 0 {
            RecordStatus::NoPages
        } else if extracted_pages == 0 {
            RecordStatus::AllPagesFailed
        } else if failed_pages > 0 {
            RecordStatus::Partial
        } else {
            RecordStatus::Complete
        };

        CandidateRecord {
            document: document.to_string(),
            fields,
            sources,
            merge_mode: self.mode,
            status,
            stats: ExtractionStats {
                total_pages,
                extracted_pages,
                failed_pages,
                contributing_pages,
                total_input_tokens: usage.input_tokens,
                total_output_tokens: usage.output_tokens,
                estimated_cost_usd: None,
            },
            failures,
        }
    }

    /// The winning value for `key` and the 1-indexed page it came from.
    fn pick<'a>(&self, key: &str, ordered: &[&'a PageResult]) -> Option<(&'a str, usize)> {
        let mut candidates = ordered.iter().filter_map(|page| {
            let value = page.fields()?.get(key)?.as_deref()?.trim();
            (!is_placeholder(value, &self.sentinel)).then_some((value, page.page_num()))
        });

        match self.mode {
            MergeMode::FirstWins => candidates.next(),
            MergeMode::LongestWins => candidates.fold(None, |best, candidate| match best {
                Some((value, _)) if char_len(candidate.0) <= char_len(value) => best,
                _ => Some(candidate),
            }),
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;

    const SENTINEL: &str = "Não informado";

    fn schema() -> FieldSchema {
        FieldSchema::new([("nome", "Nome"), ("email", "E-mail"), ("cidade", "Cidade")]).unwrap()
    }

    fn page(index: usize, values: &[(&str, Option<&str>)]) -> PageResult {
        let mut fields = FieldMap::new();
        for key in ["nome", "email", "cidade"] {
            let v = values
                .iter()
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| v.map(str::to_string));
            fields.insert(key.to_string(), v);
        }
        PageResult::extracted(index, fields)
    }

    fn failed(index: usize) -> PageResult {
        PageResult::failed(
            index,
            PageError::Parse {
                page: index + 1,
                reason: "no JSON object found".into(),
                raw_response: "Desculpe".into(),
            },
        )
    }

    #[test]
    fn first_wins_takes_earliest_page() {
        let pages = vec![
            page(0, &[("nome", Some("Ana"))]),
            page(1, &[("nome", Some("Ana Paula Souza"))]),
        ];
        let r = Reconciler::new(MergeMode::FirstWins, SENTINEL).reconcile("cv", &schema(), &pages);
        assert_eq!(r.value("nome"), Some("Ana"));
        assert_eq!(r.sources["nome"], 1);
    }

    #[test]
    fn longest_wins_takes_longest_value() {
        let pages = vec![
            page(0, &[("nome", Some("Ana"))]),
            page(1, &[("nome", Some("Ana Paula Souza"))]),
        ];
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL).reconcile("cv", &schema(), &pages);
        assert_eq!(r.value("nome"), Some("Ana Paula Souza"));
        assert_eq!(r.sources["nome"], 2);
    }

    #[test]
    fn longest_wins_ties_go_to_earlier_page() {
        let pages = vec![
            page(0, &[("cidade", Some("Natal"))]),
            page(1, &[("cidade", Some("Belém"))]),
        ];
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL).reconcile("cv", &schema(), &pages);
        assert_eq!(r.value("cidade"), Some("Natal"));
    }

    #[test]
    fn longest_wins_tie_follows_page_order_not_input_order() {
        let pages = vec![
            page(1, &[("cidade", Some("Belém"))]),
            page(0, &[("cidade", Some("Natal"))]),
        ];
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL).reconcile("cv", &schema(), &pages);
        assert_eq!(r.value("cidade"), Some("Natal"));
        assert_eq!(r.sources["cidade"], 1);
    }

    #[test]
    fn longest_wins_ignores_permutation_of_distinct_lengths() {
        let pages = vec![
            page(0, &[("nome", Some("Ana")), ("email", Some("ana.paula@empresa.com"))]),
            page(1, &[("nome", Some("Ana Paula Souza")), ("email", Some("ana@x.com"))]),
            page(2, &[("nome", Some("Ana Paula")), ("cidade", Some("Natal"))]),
        ];
        let reconciler = Reconciler::new(MergeMode::LongestWins, SENTINEL);
        let expected = reconciler.reconcile("cv", &schema(), &pages);
        assert_eq!(expected.value("nome"), Some("Ana Paula Souza"));
        assert_eq!(expected.value("email"), Some("ana.paula@empresa.com"));

        for order in [[2, 0, 1], [1, 2, 0], [2, 1, 0], [0, 2, 1]] {
            let permuted: Vec<PageResult> = order.iter().map(|&i| pages[i].clone()).collect();
            let r = reconciler.reconcile("cv", &schema(), &permuted);
            assert_eq!(r.fields, expected.fields, "order {order:?}");
            assert_eq!(r.sources, expected.sources, "order {order:?}");
        }
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // "João" is 4 chars / 5 bytes, "Joao." is 5 chars / 5 bytes.
        let pages = vec![
            page(0, &[("nome", Some("João"))]),
            page(1, &[("nome", Some("Joao."))]),
        ];
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL).reconcile("cv", &schema(), &pages);
        assert_eq!(r.value("nome"), Some("Joao."));
    }

    #[test]
    fn unknown_and_placeholder_values_never_win() {
        let pages = vec![
            page(0, &[("email", Some("Não informado"))]),
            page(1, &[("email", Some("ana@x.com"))]),
            page(2, &[("email", Some("   "))]),
        ];
        for mode in [MergeMode::FirstWins, MergeMode::LongestWins] {
            let r = Reconciler::new(mode, SENTINEL).reconcile("cv", &schema(), &pages);
            assert_eq!(r.value("email"), Some("ana@x.com"));
        }
    }

    #[test]
    fn every_schema_key_present() {
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL)
            .reconcile("cv", &schema(), &[page(0, &[("nome", Some("Ana"))])]);
        let keys: Vec<&str> = r.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["nome", "email", "cidade"]);
        assert_eq!(r.fields["email"], None);
        assert_eq!(r.status, RecordStatus::Complete);
        assert_eq!(r.stats.contributing_pages, 1);
    }

    #[test]
    fn result_order_does_not_matter() {
        let a = page(0, &[("nome", Some("Ana")), ("cidade", Some("Natal"))]);
        let b = page(1, &[("nome", Some("Ana Paula")), ("email", Some("ana@x.com"))]);
        let c = failed(2);
        let rec = Reconciler::new(MergeMode::FirstWins, SENTINEL);
        let forward = rec.reconcile("cv", &schema(), &[a.clone(), b.clone(), c.clone()]);
        let reversed = rec.reconcile("cv", &schema(), &[c, b, a]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let pages = vec![page(0, &[("nome", Some("Ana"))]), failed(1)];
        let rec = Reconciler::new(MergeMode::LongestWins, SENTINEL);
        assert_eq!(
            rec.reconcile("cv", &schema(), &pages),
            rec.reconcile("cv", &schema(), &pages)
        );
    }

    #[test]
    fn failed_pages_contribute_nothing() {
        let pages = vec![failed(0), page(1, &[("nome", Some("Ana"))])];
        let r = Reconciler::new(MergeMode::FirstWins, SENTINEL).reconcile("cv", &schema(), &pages);
        assert_eq!(r.value("nome"), Some("Ana"));
        assert_eq!(r.status, RecordStatus::Partial);
        assert_eq!(r.failures.len(), 1);
        assert_eq!(r.failures[0].page, 1);
        assert_eq!(r.failures[0].raw_response.as_deref(), Some("Desculpe"));
    }

    #[test]
    fn all_pages_failed_yields_all_unknown() {
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL)
            .reconcile("cv", &schema(), &[failed(0), failed(1)]);
        assert!(r.fields.values().all(Option::is_none));
        assert!(r.is_total_failure());
        assert_eq!(r.stats.failed_pages, 2);
    }

    #[test]
    fn zero_pages_is_not_a_failure() {
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL).reconcile("cv", &schema(), &[]);
        assert_eq!(r.status, RecordStatus::NoPages);
        assert!(!r.is_total_failure());
        assert_eq!(r.fields.len(), 3);
    }

    #[test]
    fn token_usage_is_summed() {
        let pages = vec![
            page(0, &[]).with_usage(TokenUsage { input_tokens: 100, output_tokens: 20 }),
            failed(1).with_usage(TokenUsage { input_tokens: 90, output_tokens: 5 }),
        ];
        let r = Reconciler::new(MergeMode::LongestWins, SENTINEL).reconcile("cv", &schema(), &pages);
        assert_eq!(r.stats.total_input_tokens, 190);
        assert_eq!(r.stats.total_output_tokens, 25);
    }
}
