//! Module query/filter engine
//!
//! Translates a set of search parameters into an ordered, paginated page of
//! module projections. The hidden-module visibility rule is enforced here
//! regardless of what filters the caller combined.

use serde::Serialize;

use crate::config::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};
use crate::registry::error::RegistryError;
use crate::registry::models::Caller;
use crate::registry::projection::ModuleProjection;
use crate::registry::store::ModuleRow;

/// Result ordering. Parsed strictly: an unknown value is a client error,
/// never a silent default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sort {
    #[default]
    DateCreatedDesc,
    DateCreatedAsc,
    DownloadsDesc,
    DownloadsAsc,
}

impl Sort {
    pub fn parse(text: &str) -> Result<Self, RegistryError> {
        match text.to_ascii_uppercase().as_str() {
            "DATE_CREATED_DESC" => Ok(Self::DateCreatedDesc),
            "DATE_CREATED_ASC" => Ok(Self::DateCreatedAsc),
            "DOWNLOADS_DESC" => Ok(Self::DownloadsDesc),
            "DOWNLOADS_ASC" => Ok(Self::DownloadsAsc),
            other => Err(RegistryError::InvalidParameter(format!(
                "unknown sort: {other}"
            ))),
        }
    }
}

/// Which side of the hidden flag to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HiddenFilter {
    #[default]
    None,
    Only,
    All,
}

impl HiddenFilter {
    pub fn parse(text: &str) -> Result<Self, RegistryError> {
        match text.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "only" => Ok(Self::Only),
            "all" => Ok(Self::All),
            other => Err(RegistryError::InvalidParameter(format!(
                "unknown hidden filter: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModuleQuery {
    /// Free-text substring tested against name, description and owner name.
    pub q: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    /// Owner names or ids; a module matches if any entry matches (OR).
    pub owner: Vec<String>,
    /// All listed tags must be present (AND).
    pub tags: Vec<String>,
    pub hidden: HiddenFilter,
    /// When set, keep only modules whose owner holds an elevated rank.
    pub trusted: Option<bool>,
    pub sort: Sort,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ModuleQuery {
    fn default() -> Self {
        Self {
            q: None,
            name: None,
            summary: None,
            description: None,
            owner: Vec::new(),
            tags: Vec::new(),
            hidden: HiddenFilter::default(),
            trusted: None,
            sort: Sort::default(),
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

impl ModuleQuery {
    /// Split a comma-separated parameter into trimmed, non-empty entries,
    /// the format the `owner` and `tag` parameters arrive in.
    pub fn split_param(text: &str) -> Vec<String> {
        text.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.limit < 1 || self.limit > MAX_QUERY_LIMIT {
            return Err(RegistryError::InvalidParameter(format!(
                "limit must be between 1 and {MAX_QUERY_LIMIT}"
            )));
        }
        Ok(())
    }
}

/// Pagination metadata echoed back with every page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageMeta {
    /// Matching modules before pagination.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub sort: Sort,
}

#[derive(Debug, Serialize)]
pub struct ModulePage {
    pub modules: Vec<ModuleProjection>,
    pub meta: PageMeta,
}

/// Apply visibility, filters, sort and pagination to the joined module rows.
///
/// Projection of each module (including its releases) is left to the
/// caller via `project`, which receives the page's surviving rows only.
pub fn run_query(
    rows: Vec<ModuleRow>,
    caller: Option<&Caller>,
    query: &ModuleQuery,
    project: impl Fn(&ModuleRow) -> Result<ModuleProjection, RegistryError>,
) -> Result<ModulePage, RegistryError> {
    query.validate()?;

    if query.hidden != HiddenFilter::None && caller.is_none() {
        // Asking for hidden modules only makes sense signed in.
        return Err(RegistryError::Unauthenticated);
    }

    let mut matching: Vec<ModuleRow> = rows
        .into_iter()
        .filter(|row| row.module.visible_to(caller))
        .filter(|row| hidden_filter_matches(row, caller, query.hidden))
        .filter(|row| filters_match(row, query))
        .collect();

    sort_rows(&mut matching, query.sort);

    let total = matching.len();
    let modules = matching
        .iter()
        .skip(query.offset)
        .take(query.limit)
        .map(&project)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ModulePage {
        modules,
        meta: PageMeta {
            total,
            offset: query.offset,
            limit: query.limit,
            sort: query.sort,
        },
    })
}

fn hidden_filter_matches(row: &ModuleRow, caller: Option<&Caller>, filter: HiddenFilter) -> bool {
    match filter {
        HiddenFilter::None => !row.module.hidden,
        HiddenFilter::All => true,
        HiddenFilter::Only => {
            if !row.module.hidden {
                return false;
            }
            // A default-rank caller asking for hidden modules sees only
            // their own; visible_to already admitted elevated callers.
            match caller {
                Some(c) => c.is_elevated() || c.id == row.module.owner_id,
                None => false,
            }
        }
    }
}

fn filters_match(row: &ModuleRow, query: &ModuleQuery) -> bool {
    let module = &row.module;

    if let Some(ref name) = query.name
        && !contains_ci(&module.name, name)
    {
        return false;
    }
    if let Some(ref summary) = query.summary
        && !module
            .summary
            .as_deref()
            .is_some_and(|s| contains_ci(s, summary))
    {
        return false;
    }
    if let Some(ref description) = query.description
        && !module
            .description
            .as_deref()
            .is_some_and(|d| contains_ci(d, description))
    {
        return false;
    }
    if !query.owner.is_empty() {
        let matches_owner = query.owner.iter().any(|owner| {
            row.owner_name.eq_ignore_ascii_case(owner)
                || module.owner_id.to_string().eq_ignore_ascii_case(owner)
        });
        if !matches_owner {
            return false;
        }
    }
    if !query.tags.is_empty() {
        let has_all = query.tags.iter().all(|wanted| {
            module
                .tags
                .iter()
                .any(|tag| tag.eq_ignore_ascii_case(wanted))
        });
        if !has_all {
            return false;
        }
    }
    if let Some(trusted) = query.trusted
        && row.owner_rank.is_elevated() != trusted
    {
        return false;
    }
    if let Some(ref q) = query.q {
        let hit = contains_ci(&module.name, q)
            || module.description.as_deref().is_some_and(|d| contains_ci(d, q))
            || contains_ci(&row.owner_name, q);
        if !hit {
            return false;
        }
    }
    true
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn sort_rows(rows: &mut [ModuleRow], sort: Sort) {
    match sort {
        Sort::DateCreatedDesc => {
            rows.sort_by(|a, b| b.module.created_at.cmp(&a.module.created_at));
        }
        Sort::DateCreatedAsc => {
            rows.sort_by(|a, b| a.module.created_at.cmp(&b.module.created_at));
        }
        Sort::DownloadsDesc => rows.sort_by(|a, b| b.module.downloads.cmp(&a.module.downloads)),
        Sort::DownloadsAsc => rows.sort_by(|a, b| a.module.downloads.cmp(&b.module.downloads)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::models::test_support::{new_module, new_user};
    use crate::registry::models::Rank;
    use crate::registry::projection::project_module;
    use chrono::TimeDelta;
    use rstest::rstest;
    use uuid::Uuid;

    fn row(name: &str, owner: &str, owner_rank: Rank) -> ModuleRow {
        let user = new_user(owner, owner_rank);
        ModuleRow {
            module: new_module(user.id, name),
            owner_name: user.name,
            owner_rank,
        }
    }

    fn run(
        rows: Vec<ModuleRow>,
        caller: Option<&Caller>,
        query: &ModuleQuery,
    ) -> Result<ModulePage, RegistryError> {
        run_query(rows, caller, query, |row| {
            Ok(project_module(&row.module, &row.owner_name, &[], false))
        })
    }

    fn names(page: &ModulePage) -> Vec<&str> {
        page.modules.iter().map(|m| m.name.as_str()).collect()
    }

    #[rstest]
    #[case("DATE_CREATED_DESC", Sort::DateCreatedDesc)]
    #[case("downloads_asc", Sort::DownloadsAsc)]
    fn sort_parses_known_values(#[case] text: &str, #[case] expected: Sort) {
        assert_eq!(Sort::parse(text).unwrap(), expected);
    }

    #[test]
    fn unknown_sort_is_a_client_error_not_a_default() {
        let err = Sort::parse("RELEVANCE").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParameter(_)));
        assert!(HiddenFilter::parse("maybe").is_err());
    }

    #[test]
    fn split_param_trims_and_drops_empties() {
        assert_eq!(
            ModuleQuery::split_param("alice, bob,,  carol "),
            vec!["alice", "bob", "carol"]
        );
    }

    #[test]
    fn default_query_excludes_hidden_modules_for_everyone() {
        let mut hidden = row("Secret", "alice", Rank::Default);
        hidden.module.hidden = true;
        let owner_caller = Caller {
            id: hidden.module.owner_id,
            name: "alice".to_string(),
            rank: Rank::Default,
            email_verified: true,
        };
        let rows = vec![hidden, row("Public", "bob", Rank::Default)];

        // hidden=none hides them even from the owner.
        let page = run(rows, Some(&owner_caller), &ModuleQuery::default()).unwrap();
        assert_eq!(names(&page), ["Public"]);
    }

    #[test]
    fn hidden_modules_are_invisible_to_anonymous_and_unrelated_callers() {
        let mut hidden = row("Secret", "alice", Rank::Default);
        hidden.module.hidden = true;
        let rows = vec![hidden];
        let query = ModuleQuery {
            hidden: HiddenFilter::All,
            ..Default::default()
        };

        let err = run(rows.clone(), None, &query).unwrap_err();
        assert!(matches!(err, RegistryError::Unauthenticated));

        let unrelated = new_user("eve", Rank::Default).caller();
        let page = run(rows, Some(&unrelated), &query).unwrap();
        assert!(page.modules.is_empty());
    }

    #[test]
    fn hidden_only_restricts_default_rank_callers_to_their_own() {
        let mut own = row("MyHidden", "alice", Rank::Default);
        own.module.hidden = true;
        let caller = Caller {
            id: own.module.owner_id,
            name: "alice".to_string(),
            rank: Rank::Default,
            email_verified: true,
        };
        let mut other = row("OtherHidden", "bob", Rank::Default);
        other.module.hidden = true;
        let visible = row("Public", "bob", Rank::Default);
        let rows = vec![own, other, visible];

        let query = ModuleQuery {
            hidden: HiddenFilter::Only,
            ..Default::default()
        };
        let page = run(rows.clone(), Some(&caller), &query).unwrap();
        assert_eq!(names(&page), ["MyHidden"]);

        // An elevated caller sees all hidden modules.
        let admin = new_user("root", Rank::Admin).caller();
        let page = run(rows, Some(&admin), &query).unwrap();
        assert_eq!(names(&page), ["OtherHidden", "MyHidden"]);
    }

    #[test]
    fn text_filters_are_case_insensitive_substrings() {
        let mut rows = vec![
            row("ChatUtils", "alice", Rank::Default),
            row("MapViewer", "bob", Rank::Default),
        ];
        rows[1].module.description = Some("A chat overlay".to_string());

        let query = ModuleQuery {
            name: Some("chatu".to_string()),
            ..Default::default()
        };
        let page = run(rows.clone(), None, &query).unwrap();
        assert_eq!(names(&page), ["ChatUtils"]);

        // q matches name OR description OR owner name.
        let query = ModuleQuery {
            q: Some("CHAT".to_string()),
            ..Default::default()
        };
        let page = run(rows.clone(), None, &query).unwrap();
        assert_eq!(page.meta.total, 2);

        let query = ModuleQuery {
            q: Some("bob".to_string()),
            ..Default::default()
        };
        let page = run(rows, None, &query).unwrap();
        assert_eq!(names(&page), ["MapViewer"]);
    }

    #[test]
    fn owner_filter_is_or_and_tag_filter_is_and() {
        let mut a = row("Alpha", "alice", Rank::Default);
        a.module.tags = ["chat", "utility"].into_iter().map(String::from).collect();
        let mut b = row("Beta", "bob", Rank::Default);
        b.module.tags = ["chat"].into_iter().map(String::from).collect();
        let c = row("Gamma", "carol", Rank::Default);
        let rows = vec![a, b, c];

        let query = ModuleQuery {
            owner: vec!["alice".to_string(), "bob".to_string()],
            ..Default::default()
        };
        let page = run(rows.clone(), None, &query).unwrap();
        assert_eq!(page.meta.total, 2);

        let query = ModuleQuery {
            tags: vec!["chat".to_string(), "utility".to_string()],
            ..Default::default()
        };
        let page = run(rows.clone(), None, &query).unwrap();
        assert_eq!(names(&page), ["Alpha"]);

        // Owner ids work too.
        let owner_id = rows[2].module.owner_id.to_string();
        let query = ModuleQuery {
            owner: vec![owner_id],
            ..Default::default()
        };
        let page = run(rows, None, &query).unwrap();
        assert_eq!(names(&page), ["Gamma"]);
    }

    #[test]
    fn trusted_filter_keeps_modules_with_elevated_owners() {
        let rows = vec![
            row("ByDefault", "alice", Rank::Default),
            row("ByTrusted", "bob", Rank::Trusted),
        ];
        let query = ModuleQuery {
            trusted: Some(true),
            ..Default::default()
        };
        let page = run(rows, None, &query).unwrap();
        assert_eq!(names(&page), ["ByTrusted"]);
    }

    #[test]
    fn sorting_and_pagination_report_total_before_the_page() {
        let mut rows: Vec<ModuleRow> = Vec::new();
        for (i, name) in ["First", "Second", "Third"].iter().enumerate() {
            let mut r = row(name, "alice", Rank::Default);
            r.module.created_at = r.module.created_at + TimeDelta::seconds(i as i64);
            r.module.downloads = (10 - i) as i64;
            rows.push(r);
        }

        let query = ModuleQuery {
            sort: Sort::DateCreatedDesc,
            limit: 2,
            ..Default::default()
        };
        let page = run(rows.clone(), None, &query).unwrap();
        assert_eq!(names(&page), ["Third", "Second"]);
        assert_eq!(page.meta.total, 3);

        let query = ModuleQuery {
            sort: Sort::DownloadsAsc,
            limit: 2,
            offset: 2,
            ..Default::default()
        };
        let page = run(rows, None, &query).unwrap();
        assert_eq!(names(&page), ["First"]);
        assert_eq!(page.meta.total, 3);
        assert_eq!(page.meta.offset, 2);
    }

    #[rstest]
    #[case(0)]
    #[case(MAX_QUERY_LIMIT + 1)]
    fn out_of_range_limit_is_rejected(#[case] limit: usize) {
        let query = ModuleQuery {
            limit,
            ..Default::default()
        };
        let err = run(vec![], None, &query).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidParameter(_)));
    }
}
