use std::collections::HashSet;

use checkon_core::EnvName;

/// Reads the environment names out of `tox -l` output.
///
/// Blank lines and section headers (lines ending in `:`) are skipped; anything after the
/// first whitespace on a line is a description and is dropped.
pub fn parse_environment_listing(stdout: &str) -> Vec<EnvName> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .filter_map(|line| line.split_whitespace().next())
        .map(EnvName::from)
        .collect()
}

/// Keeps environments whose name contains any fragment, preserving declared order.
///
/// An empty fragment list keeps everything. Repeated names are kept once.
pub fn filter_environments(declared: &[EnvName], fragments: &[String]) -> Vec<EnvName> {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for envname in declared {
        let selected = fragments.is_empty()
            || fragments
                .iter()
                .any(|fragment| envname.as_str().contains(fragment.as_str()));
        if selected && seen.insert(envname.as_str()) {
            kept.push(envname.clone());
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(raw: &[&str]) -> Vec<EnvName> {
        raw.iter().copied().map(EnvName::from).collect()
    }

    #[test]
    fn listing_skips_headers_and_descriptions() {
        let stdout = "default environments:\npy311 -> run the tests\n\nlint\n  py312  \n";
        assert_eq!(
            parse_environment_listing(stdout),
            names(&["py311", "lint", "py312"])
        );
    }

    #[test]
    fn empty_fragments_keep_all_environments() {
        let declared = names(&["py39", "py311", "docs"]);
        assert_eq!(filter_environments(&declared, &[]), declared);
    }

    #[test]
    fn fragments_match_case_sensitive_substrings() {
        let declared = names(&["py39", "py311-django", "PY312", "docs"]);
        let fragments = vec!["py3".to_owned(), "doc".to_owned()];
        assert_eq!(
            filter_environments(&declared, &fragments),
            names(&["py39", "py311-django", "docs"])
        );
    }

    #[test]
    fn duplicate_listing_entries_are_kept_once() {
        let declared = names(&["py311", "lint", "py311"]);
        assert_eq!(
            filter_environments(&declared, &[]),
            names(&["py311", "lint"])
        );
    }

    proptest! {
        #[test]
        fn kept_set_matches_the_substring_definition(
            declared in prop::collection::btree_set("[a-z0-9-]{1,8}", 0..12),
            fragments in prop::collection::vec("[a-z0-9]{0,3}", 0..4),
        ) {
            let declared: Vec<EnvName> = declared.into_iter().map(EnvName::from).collect();
            let kept = filter_environments(&declared, &fragments);

            let expected: Vec<EnvName> = declared
                .iter()
                .filter(|envname| {
                    fragments.is_empty()
                        || fragments
                            .iter()
                            .any(|fragment| envname.as_str().contains(fragment.as_str()))
                })
                .cloned()
                .collect();
            prop_assert_eq!(kept, expected);
        }

        #[test]
        fn filtering_never_invents_environments(
            declared in prop::collection::vec("[a-z]{1,4}", 0..10),
            fragments in prop::collection::vec("[a-z]{1,2}", 0..3),
        ) {
            let declared: Vec<EnvName> = declared.into_iter().map(EnvName::from).collect();
            for envname in filter_environments(&declared, &fragments) {
                prop_assert!(declared.contains(&envname));
            }
        }
    }
}
