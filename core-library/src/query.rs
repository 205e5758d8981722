//! Song Search Query Compiler
//!
//! Turns a structured [`SongFilter`] into a [`QuerySpec`]: SQL fragments plus
//! positional parameters, ready to be rendered into a page query or a count
//! query. Compilation is pure; the only engine knowledge it needs is the
//! probed [`Capabilities`], passed in as data.
//!
//! ## Search dispatch
//!
//! The free-text `search` string selects exactly one strategy:
//!
//! 1. `i1471` or `i1471, i1472`: exact id lookup. Every other filter is
//!    ignored and the ids are recorded for a repair fetch.
//! 2. `120`: song number within a source (restricted to the selected
//!    sources when a source filter is present).
//! 3. Anything else with content: title/text search. Full-text index when
//!    available, substring `LIKE` matching otherwise. `*` is a
//!    multi-character wildcard and `.` a single-character one.
//! 4. Empty: structured filters only.
//!
//! ## Usage
//!
//! ```ignore
//! use core_library::query::{QuerySpec, SongFilter};
//! use core_library::pagination::PageRequest;
//!
//! let filter = SongFilter::new().search("sil*nt").lang("en");
//! let spec = QuerySpec::compile(&filter, &caps);
//! let ids = driver.execute_one(&spec.select_ids(PageRequest::new(1, 50)).sql, ..).await?;
//! ```

use bridge_traits::database::{QueryValue, Statement};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::import::placeholders;
use crate::pagination::PageRequest;
use crate::schema::{Capabilities, FtsVariant, FTS_TABLE};
use crate::text;

static ID_SEARCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*i\d+(\s*,?\s*i\d+)*\s*$").unwrap());

static ID_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)i(\d+)").unwrap());

/// Columns matched by substring search
const LIKE_COLUMNS: &[&str] = &[
    "songs.search_title",
    "songs.search_alternative_titles",
    "songs.search_text",
    "songs.search_meta",
];

// =============================================================================
// Filter
// =============================================================================

/// Explicit sort requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Alphabetic by normalized title
    Title,
    /// Most used first
    Usage,
    /// Highest rated first
    Rating,
    /// Most recent first
    Recent,
    /// Song number within the (selected) sources
    Number,
    /// Track number within the (selected) albums
    Track,
    /// Ascending song id
    Id,
}

/// Tag predicate; inclusion and exclusion are independent per tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub tag_id: i64,
    pub include: bool,
}

/// Structured search request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongFilter {
    pub search: String,
    pub langs: Vec<String>,
    pub songkey: Option<String>,
    pub sources: Vec<i64>,
    pub albums: Vec<i64>,
    pub tags: Vec<TagFilter>,
    pub has_chord: Option<bool>,
    pub has_sheet: Option<bool>,
    pub has_mp3: Option<bool>,
    pub is_original: Option<bool>,
    pub copyright_restricted: Option<bool>,
    pub favourite: Option<bool>,
    pub sort: Option<SortOrder>,
}

impl SongFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.langs.push(lang.into());
        self
    }

    pub fn songkey(mut self, key: impl Into<String>) -> Self {
        self.songkey = Some(key.into());
        self
    }

    /// Source ids as a comma-separated list, e.g. `"3,7"`
    pub fn sources_csv(mut self, csv: &str) -> Self {
        self.sources = parse_id_list(csv);
        self
    }

    /// Album ids as a comma-separated list
    pub fn albums_csv(mut self, csv: &str) -> Self {
        self.albums = parse_id_list(csv);
        self
    }

    pub fn include_tag(mut self, tag_id: i64) -> Self {
        self.tags.push(TagFilter {
            tag_id,
            include: true,
        });
        self
    }

    pub fn exclude_tag(mut self, tag_id: i64) -> Self {
        self.tags.push(TagFilter {
            tag_id,
            include: false,
        });
        self
    }

    pub fn has_chord(mut self, value: bool) -> Self {
        self.has_chord = Some(value);
        self
    }

    pub fn has_sheet(mut self, value: bool) -> Self {
        self.has_sheet = Some(value);
        self
    }

    pub fn has_mp3(mut self, value: bool) -> Self {
        self.has_mp3 = Some(value);
        self
    }

    pub fn is_original(mut self, value: bool) -> Self {
        self.is_original = Some(value);
        self
    }

    pub fn copyright_restricted(mut self, value: bool) -> Self {
        self.copyright_restricted = Some(value);
        self
    }

    pub fn favourite(mut self, value: bool) -> Self {
        self.favourite = Some(value);
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// Parse a comma/whitespace separated id list, dropping anything that is not a positive integer.
pub fn parse_id_list(csv: &str) -> Vec<i64> {
    csv.split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|part| part.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .collect()
}

// =============================================================================
// Search dispatch
// =============================================================================

/// Strategy selected by the free-text search string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKind {
    /// Exact ids, in the order given
    Ids(Vec<i64>),
    /// Song number within a source
    Number(i64),
    /// Normalized text pattern, wildcards kept
    Text(String),
    Blank,
}

impl SearchKind {
    pub fn classify(search: &str) -> Self {
        let trimmed = search.trim();
        if trimmed.is_empty() {
            return SearchKind::Blank;
        }

        if ID_SEARCH.is_match(trimmed) {
            let mut ids: Vec<i64> = Vec::new();
            for caps in ID_TOKEN.captures_iter(trimmed) {
                if let Ok(id) = caps[1].parse::<i64>() {
                    if id > 0 && !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            return SearchKind::Ids(ids);
        }

        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(number) = trimmed.parse::<i64>() {
                return SearchKind::Number(number);
            }
        }

        let pattern = text::normalize_pattern(trimmed);
        if pattern.is_empty() {
            SearchKind::Blank
        } else {
            SearchKind::Text(pattern)
        }
    }
}

/// `sil*nt` → `sil%nt`, `silen.` → `silen_`
fn like_body(pattern: &str) -> String {
    pattern.replace('*', "%").replace('.', "_")
}

/// Prefix terms for the full-text index; `None` when no token has a usable prefix
fn fts_expression(pattern: &str, variant: FtsVariant) -> Option<String> {
    let terms: Vec<String> = pattern
        .split(' ')
        .filter_map(|token| {
            let prefix = token.split(['*', '.']).next().unwrap_or_default();
            (!prefix.is_empty()).then(|| variant.prefix_term(prefix))
        })
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

// =============================================================================
// Query specification
// =============================================================================

/// Compiled search: SQL fragments with their positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub from: String,
    pub where_: Vec<String>,
    pub params: Vec<QueryValue>,
    pub order: Vec<String>,
    pub order_params: Vec<QueryValue>,
    /// Ids to repair-fetch when nothing matches locally
    pub fetch_ids: Vec<i64>,
    pub kind: SearchKind,
}

impl QuerySpec {
    pub fn compile(filter: &SongFilter, caps: &Capabilities) -> Self {
        let kind = SearchKind::classify(&filter.search);
        let mut spec = QuerySpec {
            from: "songs".to_string(),
            where_: Vec::new(),
            params: Vec::new(),
            order: Vec::new(),
            order_params: Vec::new(),
            fetch_ids: Vec::new(),
            kind: kind.clone(),
        };

        match &kind {
            SearchKind::Ids(ids) => {
                spec.compile_ids(ids);
                return spec;
            }
            SearchKind::Number(number) => spec.compile_number(*number, &filter.sources),
            SearchKind::Text(pattern) => spec.compile_text(pattern, caps),
            SearchKind::Blank => {}
        }

        spec.compile_filters(filter);
        spec.compile_order(filter);
        spec
    }

    fn compile_ids(&mut self, ids: &[i64]) {
        if ids.is_empty() {
            self.where_.push("0".to_string());
            self.order.push("songs.id".to_string());
            return;
        }

        self.where_
            .push(format!("songs.id IN ({})", placeholders(ids.len())));
        self.params.extend(ids.iter().map(|&id| QueryValue::from(id)));

        let mut case = String::from("CASE songs.id");
        for (position, &id) in ids.iter().enumerate() {
            case.push_str(" WHEN ? THEN ?");
            self.order_params.push(id.into());
            self.order_params.push((position as i64).into());
        }
        case.push_str(" END");
        self.order.push(case);
        self.order.push("songs.id".to_string());
        self.fetch_ids = ids.to_vec();
    }

    fn compile_number(&mut self, number: i64, sources: &[i64]) {
        let mut sql = String::from("songs.id IN (SELECT song_id FROM song_source WHERE number = ?");
        self.params.push(number.into());
        if !sources.is_empty() {
            sql.push_str(&format!(" AND source_id IN ({})", placeholders(sources.len())));
            self.params.extend(sources.iter().map(|&id| QueryValue::from(id)));
        }
        sql.push(')');
        self.where_.push(sql);
    }

    fn compile_text(&mut self, pattern: &str, caps: &Capabilities) {
        let has_wildcard = pattern.contains(['*', '.']);
        let fts = caps.fts.and_then(|variant| fts_expression(pattern, variant));

        if let Some(expression) = &fts {
            self.where_.push(format!(
                "songs.id IN (SELECT rowid FROM {table} WHERE {table} MATCH ?)",
                table = FTS_TABLE
            ));
            self.params.push(expression.clone().into());
        }

        // Prefix terms over-match wildcard patterns; refine with LIKE
        if fts.is_none() || has_wildcard {
            let like = format!("%{}%", like_body(pattern));
            let clauses: Vec<String> = LIKE_COLUMNS
                .iter()
                .map(|column| format!("{} LIKE ?", column))
                .collect();
            self.where_.push(format!("({})", clauses.join(" OR ")));
            for _ in LIKE_COLUMNS {
                self.params.push(like.clone().into());
            }
        }
    }

    fn compile_filters(&mut self, filter: &SongFilter) {
        match filter.langs.len() {
            0 => {}
            1 => {
                self.where_.push("songs.lang = ?".to_string());
                self.params.push(filter.langs[0].clone().into());
            }
            n => {
                self.where_.push(format!("songs.lang IN ({})", placeholders(n)));
                self.params
                    .extend(filter.langs.iter().map(|l| QueryValue::from(l.as_str())));
            }
        }

        if let Some(key) = &filter.songkey {
            self.where_.push("songs.songkey = ?".to_string());
            self.params.push(key.clone().into());
        }

        // A number search already restricts to the selected sources
        if !filter.sources.is_empty() && !matches!(self.kind, SearchKind::Number(_)) {
            self.where_.push(format!(
                "songs.id IN (SELECT song_id FROM song_source WHERE source_id IN ({}))",
                placeholders(filter.sources.len())
            ));
            self.params
                .extend(filter.sources.iter().map(|&id| QueryValue::from(id)));
        }

        if !filter.albums.is_empty() {
            self.where_.push(format!(
                "songs.id IN (SELECT song_id FROM song_albums WHERE album_id IN ({}))",
                placeholders(filter.albums.len())
            ));
            self.params
                .extend(filter.albums.iter().map(|&id| QueryValue::from(id)));
        }

        for tag in &filter.tags {
            let exists = if tag.include { "EXISTS" } else { "NOT EXISTS" };
            self.where_.push(format!(
                "{} (SELECT 1 FROM song_tags WHERE song_tags.song_id = songs.id AND song_tags.tag_id = ?)",
                exists
            ));
            self.params.push(tag.tag_id.into());
        }

        let flags = [
            ("has_chord", filter.has_chord),
            ("has_sheet", filter.has_sheet),
            ("has_mp3", filter.has_mp3),
            ("is_original", filter.is_original),
            ("copyright_restricted", filter.copyright_restricted),
            ("favourite", filter.favourite),
        ];
        for (column, value) in flags {
            if let Some(value) = value {
                self.where_.push(format!("songs.{} = ?", column));
                self.params.push(value.into());
            }
        }
    }

    fn compile_order(&mut self, filter: &SongFilter) {
        let sort = filter.sort.unwrap_or(match (&self.kind, filter) {
            (SearchKind::Text(_), _) => SortOrder::Title,
            (_, f) if !f.sources.is_empty() => SortOrder::Number,
            (_, f) if !f.albums.is_empty() => SortOrder::Track,
            _ => SortOrder::Usage,
        });

        // Exact-prefix title matches lead any text search sorted by title
        if let (SearchKind::Text(pattern), SortOrder::Title) = (&self.kind, sort) {
            self.order
                .push("CASE WHEN songs.search_title LIKE ? THEN 0 ELSE 1 END".to_string());
            self.order_params
                .push(format!("{}%", like_body(pattern)).into());
        }

        match sort {
            SortOrder::Title => {}
            SortOrder::Usage => self.order.push("songs.usage DESC".to_string()),
            SortOrder::Rating => self.order.push("songs.rating DESC".to_string()),
            SortOrder::Recent => self.order.push("songs.recent DESC".to_string()),
            SortOrder::Number => {
                let sub = self.membership_subquery("number", "song_source", "source_id", &filter.sources);
                self.order.push(format!("{} IS NULL", sub));
                self.order.push(sub);
                self.extend_membership_params(&filter.sources);
                self.extend_membership_params(&filter.sources);
            }
            SortOrder::Track => {
                let sub = self.membership_subquery("track", "song_albums", "album_id", &filter.albums);
                self.order.push(format!("{} IS NULL", sub));
                self.order.push(sub);
                self.extend_membership_params(&filter.albums);
                self.extend_membership_params(&filter.albums);
            }
            SortOrder::Id => {
                self.order.push("songs.id".to_string());
                return;
            }
        }

        self.order.push("songs.sort_title".to_string());
        self.order.push("songs.id".to_string());
    }

    /// Lowest `column` of the song across the selected (or all) parents
    fn membership_subquery(&self, column: &str, table: &str, parent: &str, ids: &[i64]) -> String {
        let mut sql = format!(
            "(SELECT MIN({column}) FROM {table} WHERE {table}.song_id = songs.id",
            column = column,
            table = table
        );
        if !ids.is_empty() {
            sql.push_str(&format!(" AND {}.{} IN ({})", table, parent, placeholders(ids.len())));
        }
        sql.push(')');
        sql
    }

    fn extend_membership_params(&mut self, ids: &[i64]) {
        self.order_params
            .extend(ids.iter().map(|&id| QueryValue::from(id)));
    }

    fn where_clause(&self) -> String {
        if self.where_.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.where_.join(" AND "))
        }
    }

    /// One page of matching ids, in result order
    pub fn select_ids(&self, page: PageRequest) -> Statement {
        let sql = format!(
            "SELECT songs.id AS id FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
            self.from,
            self.where_clause(),
            self.order.join(", ")
        );

        let mut params = self.params.clone();
        params.extend(self.order_params.iter().cloned());
        params.push(QueryValue::Integer(page.limit() as i64));
        params.push(QueryValue::Integer(page.offset() as i64));
        Statement::new(sql, params)
    }

    /// Total number of matches
    pub fn count(&self) -> Statement {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM {}{}",
            self.from,
            self.where_clause()
        );
        Statement::new(sql, self.params.clone())
    }
}
