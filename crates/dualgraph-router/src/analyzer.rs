//! Query complexity analysis.
//!
//! Scores a Cypher-style query pattern by its structure alone: relationship
//! hops, variable-length ranges, aggregation, union and the number of
//! patterns. The function is total; text it cannot read lands in the lowest
//! bucket with an anomaly flag instead of failing.
//!
//! ## Score composition
//! Each structural class owns a score band:
//! ```text
//! score = (matches + 4·fixed hops per chain (≤10) + min(2·aggs (+1.5 ordered), 3.5)
//!          + varlen + 15·unions + 4·(p-1)²) · (1 + 0.25·(p-1))
//! ```
//! where `p` is the number of patterns. The aggregation cap sits below one
//! hop. Any bounded variable-length hop costs `50 + min(width,20)`, above the
//! longest fixed chain, and an unbounded one costs `80`.
//!
//! Relationship chains are read from the whole query, so paths inside
//! `WHERE` predicates, `EXISTS {}` subqueries and pattern comprehensions
//! count toward depth and the unbounded flag. Only clause keywords at
//! bracket depth zero split the query into clauses.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use dualgraph_core::routing::model::{ComplexityScore, QueryAnomaly, RoutingThresholds, UNBOUNDED_DEPTH};

const CLAUSE_COST: f64 = 1.0;
const HOP_COST: f64 = 4.0;
const FIXED_HOP_CAP: u32 = 10;
const AGGREGATION_PENALTY: f64 = 2.0;
const ORDERED_AGGREGATION_PENALTY: f64 = 1.5;
const AGGREGATION_CAP: f64 = 3.5;
const VARLEN_PENALTY: f64 = 50.0;
const VARLEN_WIDTH_WEIGHT: f64 = 1.0;
const VARLEN_WIDTH_CAP: u32 = 20;
const UNBOUNDED_PENALTY: f64 = 80.0;
const UNION_PENALTY: f64 = 15.0;
const EXTRA_PATTERN_PENALTY: f64 = 4.0;
const EXTRA_PATTERN_FACTOR: f64 = 0.25;

static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(OPTIONAL\s+MATCH|MATCH|RETURN|WITH|UNWIND|CALL|CREATE|MERGE|WHERE|ORDER\s+BY|SKIP|LIMIT|UNION|SET|DELETE|DETACH|REMOVE|FOREACH)\b",
    )
    .expect("clause regex is valid")
});

static REL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<?-\s*\[([^\[\]]*)\]\s*->?").expect("relationship regex is valid"));

static BARE_REL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\)\s*((?:<-|-)(?:->|-))\s*\(").expect("bare relationship regex is valid"));

static VARLEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\s*(\d+)?\s*(\.\.)?\s*(\d+)?").expect("varlen regex is valid"));

static AGGREGATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(count|sum|avg|min|max|collect|stdev|stdevp|percentilecont|percentiledisc)\s*\(")
        .expect("aggregate regex is valid")
});

/// Length of one relationship in a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hop {
    Fixed,
    Range { min: u32, max: u32 },
    Unbounded,
}

/// A top-level clause keyword.
struct Clause {
    keyword: String,
    span: Range<usize>,
}

/// Consecutive relationships joined by single node patterns.
#[derive(Debug)]
struct Chain {
    start: usize,
    hops: Vec<Hop>,
}

impl Chain {
    fn fixed_hops(&self) -> u32 {
        self.hops.iter().filter(|h| matches!(h, Hop::Fixed)).count() as u32
    }

    fn is_unbounded(&self) -> bool {
        self.hops.iter().any(|h| matches!(h, Hop::Unbounded))
    }

    fn depth(&self) -> u32 {
        self.hops.iter().fold(0u32, |depth, hop| match hop {
            Hop::Fixed => depth.saturating_add(1),
            Hop::Range { max, .. } => depth.saturating_add(*max),
            Hop::Unbounded => depth,
        })
    }
}

/// Pure scorer for query patterns.
#[derive(Debug, Clone, Copy)]
pub struct ComplexityAnalyzer {
    simple_threshold: f64,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new(RoutingThresholds::default().simple_threshold)
    }
}

impl ComplexityAnalyzer {
    pub fn new(simple_threshold: f64) -> Self {
        Self { simple_threshold }
    }

    pub fn simple_threshold(&self) -> f64 {
        self.simple_threshold
    }

    /// Analyze one query. Never fails.
    pub fn analyze(&self, query: &str) -> ComplexityScore {
        if query.trim().is_empty() {
            return ComplexityScore::anomalous(QueryAnomaly::Empty);
        }

        let text = blank_string_literals(query);
        if !brackets_balanced(&text) {
            return ComplexityScore::anomalous(QueryAnomaly::UnbalancedBrackets);
        }

        let clauses = top_level_clauses(&text);
        let pattern_only = text.trim_start().starts_with('(');
        if clauses.is_empty() && !pattern_only {
            return ComplexityScore::anomalous(QueryAnomaly::Unrecognized);
        }

        let bodies = if clauses.is_empty() {
            vec![0..text.len()]
        } else {
            match_bodies(&text, &clauses)
        };
        let chains = relationship_chains(&text);

        let mut pattern_count: usize = bodies.iter().map(|b| split_top_level(&text[b.clone()], ',').len()).sum();
        pattern_count += chains
            .iter()
            .filter(|chain| !bodies.iter().any(|b| b.contains(&chain.start)))
            .count();

        let mut score = CLAUSE_COST * bodies.len().max(1) as f64;
        let mut max_depth = 0u32;
        let mut relationship_count = 0usize;
        let mut has_variable_length = false;
        let mut has_unbounded_path = false;

        for chain in &chains {
            relationship_count += chain.hops.len();
            score += HOP_COST * chain.fixed_hops().min(FIXED_HOP_CAP) as f64;
            for hop in &chain.hops {
                match *hop {
                    Hop::Fixed => {}
                    Hop::Range { min, max } => {
                        has_variable_length = true;
                        let width = max.saturating_sub(min).min(VARLEN_WIDTH_CAP);
                        score += VARLEN_PENALTY + VARLEN_WIDTH_WEIGHT * width as f64;
                    }
                    Hop::Unbounded => {
                        has_variable_length = true;
                        score += UNBOUNDED_PENALTY;
                    }
                }
            }
            if chain.is_unbounded() {
                has_unbounded_path = true;
                max_depth = UNBOUNDED_DEPTH;
            } else if !has_unbounded_path {
                max_depth = max_depth.max(chain.depth());
            }
        }

        let aggregations = AGGREGATE_RE
            .find_iter(&text)
            .filter(|m| !follows_accessor(&text, m.start()))
            .count();
        if aggregations > 0 {
            let mut penalty = AGGREGATION_PENALTY * aggregations as f64;
            if clauses.iter().any(|c| c.keyword.starts_with("ORDER")) {
                penalty += ORDERED_AGGREGATION_PENALTY;
            }
            score += penalty.min(AGGREGATION_CAP);
        }

        let unions = clauses.iter().filter(|c| c.keyword == "UNION").count();
        score += UNION_PENALTY * unions as f64;

        if pattern_count > 1 {
            let extra = (pattern_count - 1) as f64;
            score += EXTRA_PATTERN_PENALTY * extra * extra;
            score *= 1.0 + EXTRA_PATTERN_FACTOR * extra;
        }

        ComplexityScore {
            score,
            is_simple: score < self.simple_threshold,
            max_depth,
            pattern_count,
            relationship_count,
            has_variable_length,
            has_unbounded_path,
            has_aggregation: aggregations > 0,
            has_union: unions > 0,
            anomaly: None,
        }
    }
}

/// Replace the contents of quoted literals so keywords inside them are ignored.
fn blank_string_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in query.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                    out.push('_');
                } else if c == '\\' {
                    escaped = true;
                    out.push('_');
                } else if c == q {
                    quote = None;
                    out.push(c);
                } else {
                    out.push('_');
                }
            }
            None => {
                if c == '\'' || c == '"' || c == '`' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

fn brackets_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Bracket nesting before each byte of `text`.
fn bracket_depths(text: &str) -> Vec<u32> {
    let mut depths = Vec::with_capacity(text.len() + 1);
    let mut depth = 0u32;
    for b in text.bytes() {
        depths.push(depth);
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depths.push(depth);
    depths
}

/// `n.count(`, `:Set`, `$limit` name things, they are not keywords.
fn follows_accessor(text: &str, start: usize) -> bool {
    matches!(text[..start].trim_end().chars().last(), Some('.' | ':' | '$'))
}

/// Clause keywords outside every bracket pair.
fn top_level_clauses(text: &str) -> Vec<Clause> {
    let depths = bracket_depths(text);
    CLAUSE_RE
        .find_iter(text)
        .filter(|m| depths[m.start()] == 0 && !follows_accessor(text, m.start()))
        .map(|m| Clause {
            keyword: m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase(),
            span: m.range(),
        })
        .collect()
}

/// Byte range of every MATCH clause body, up to the next clause keyword.
fn match_bodies(text: &str, clauses: &[Clause]) -> Vec<Range<usize>> {
    let mut bodies = Vec::new();
    for (i, clause) in clauses.iter().enumerate() {
        if !clause.keyword.ends_with("MATCH") {
            continue;
        }
        let end = clauses.get(i + 1).map_or(text.len(), |next| next.span.start);
        bodies.push(clause.span.end..end);
    }
    bodies
}

/// Split on `sep` outside of any bracket pair, dropping empty pieces.
fn split_top_level(body: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&body[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Every relationship in `text`, grouped into chains.
fn relationship_chains(text: &str) -> Vec<Chain> {
    let mut hops: Vec<(Range<usize>, Hop)> = REL_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let span = caps.get(0)?.range();
            let hop = caps.get(1).map_or(Hop::Fixed, |inner| parse_hop(inner.as_str()));
            Some((span, hop))
        })
        .collect();
    hops.extend(
        BARE_REL_RE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|arrow| (arrow.range(), Hop::Fixed))),
    );
    hops.sort_by_key(|(span, _)| span.start);

    let mut chains: Vec<Chain> = Vec::new();
    let mut last_end = None;
    for (span, hop) in hops {
        let joined = last_end.is_some_and(|end: usize| end <= span.start && is_single_node(&text[end..span.start]));
        if joined {
            if let Some(chain) = chains.last_mut() {
                chain.hops.push(hop);
            }
        } else {
            chains.push(Chain { start: span.start, hops: vec![hop] });
        }
        last_end = Some(span.end);
    }
    chains
}

/// Whether `between` is exactly one `( ... )` node pattern.
fn is_single_node(between: &str) -> bool {
    let trimmed = between.trim();
    if !trimmed.starts_with('(') || !trimmed.ends_with(')') {
        return false;
    }
    let mut depth = 0i32;
    for (i, c) in trimmed.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 && i + c.len_utf8() < trimmed.len() {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn parse_hop(inner: &str) -> Hop {
    let Some(caps) = VARLEN_RE.captures(inner) else {
        return Hop::Fixed;
    };
    let lower = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
    let has_range = caps.get(2).is_some();
    let upper = caps.get(3).and_then(|m| m.as_str().parse::<u32>().ok());

    match (lower, has_range, upper) {
        (Some(n), false, _) => Hop::Range { min: n, max: n },
        (None, false, _) => Hop::Unbounded,
        (_, true, None) => Hop::Unbounded,
        (min, true, Some(max)) => {
            let min = min.unwrap_or(1);
            Hop::Range { min: min.min(max), max }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_HOP: &str = "MATCH (a:Function {name: 'main'})-[:CALLS]->(b) RETURN b";
    const SINGLE_HOP_AGG: &str = "MATCH (a:Function {name: 'main'})-[:CALLS]->(b) RETURN count(b)";
    const MULTI_HOP: &str = "MATCH (a)-[:CALLS]->(b)-[:CALLS]->(c)-[:IMPORTS]->(d) RETURN d";
    const BOUNDED_RANGE: &str = "MATCH (a)-[:CALLS*1..5]->(b) RETURN b";
    const UNBOUNDED: &str = "MATCH (a {id: 'x'})-[:CALLS*]->(b) RETURN b";
    const KITCHEN_SINK: &str = "MATCH (a)-[:CALLS*]->(b), (b)-[:DEFINES]->(c) \
        RETURN c.name AS name, count(*) AS n ORDER BY n \
        UNION MATCH (x)-[:CALLS]->(y) RETURN y.name AS name, count(*) AS n ORDER BY n";

    fn score(q: &str) -> f64 {
        ComplexityAnalyzer::default().analyze(q).score
    }

    #[test]
    fn test_complexity_ordering() {
        let scores: Vec<f64> = [SINGLE_HOP, SINGLE_HOP_AGG, MULTI_HOP, UNBOUNDED, KITCHEN_SINK]
            .iter()
            .map(|q| score(q))
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] < pair[1], "ordering violated: {:?}", scores);
        }
        assert!(score(BOUNDED_RANGE) < score(UNBOUNDED));
        assert!(score(SINGLE_HOP_AGG) < score(BOUNDED_RANGE));
    }

    #[test]
    fn test_classes_keep_their_bands() {
        let ordered_agg = score("MATCH (a)-[:CALLS]->(b) RETURN b.name, count(*), collect(b) ORDER BY b.name");
        let two_hop = score("MATCH (a)-[:CALLS]->(b)-[:CALLS]->(c) RETURN c");
        assert!(ordered_agg < two_hop, "{ordered_agg} >= {two_hop}");

        let five_hop = score("MATCH (a)-[:A]->(b)-[:B]->(c)-[:C]->(d)-[:D]->(e)-[:E]->(f) RETURN f");
        let narrow_range = score("MATCH (a)-[:CALLS*1..3]->(b) RETURN b");
        assert!(five_hop < narrow_range, "{five_hop} >= {narrow_range}");

        let ten_hop_agg = score(
            "MATCH (a)-->(b)-->(c)-->(d)-->(e)-->(f)-->(g)-->(h)-->(i)-->(j)-->(k) RETURN count(k) ORDER BY count(k)",
        );
        let exact_range = score("MATCH (a)-[:CALLS*2]->(b) RETURN b");
        assert!(ten_hop_agg < exact_range, "{ten_hop_agg} >= {exact_range}");

        assert!(score("MATCH (a)-[:CALLS*1..100]->(b) RETURN b") < score(UNBOUNDED));
    }

    #[test]
    fn test_keywords_in_names_do_not_split_clauses() {
        for q in [
            "MATCH (a:Function)-[:CALL*]->(b) RETURN b",
            "MATCH (a:Set)-[*]->(b) RETURN b",
            "MATCH (a {limit: 1, where: 2})-[:CALLS*]->(b) RETURN b.return",
        ] {
            let result = ComplexityAnalyzer::default().analyze(q);
            assert!(result.has_unbounded_path, "{q}");
            assert_eq!(result.max_depth, UNBOUNDED_DEPTH, "{q}");
            assert!(!result.is_simple, "{q}");
        }

        let union_label = ComplexityAnalyzer::default().analyze("MATCH (a:Union)-[:IN]->(b:Order) RETURN b");
        assert!(!union_label.has_union);
        assert_eq!(union_label.max_depth, 1);
    }

    #[test]
    fn test_paths_outside_match_are_analyzed() {
        let predicate = ComplexityAnalyzer::default().analyze("MATCH (a) WHERE (a)-[:CALLS*]->(:Entry) RETURN a");
        assert!(predicate.has_unbounded_path);
        assert_eq!(predicate.pattern_count, 2);

        let exists =
            ComplexityAnalyzer::default().analyze("MATCH (a) WHERE EXISTS { MATCH (a)-[:CALLS*2..6]->(b) } RETURN a");
        assert!(exists.has_variable_length);
        assert_eq!(exists.max_depth, 6);

        let comprehension =
            ComplexityAnalyzer::default().analyze("MATCH (a) RETURN [(a)-[:IMPORTS*]->(m) | m.name] AS mods");
        assert!(comprehension.has_unbounded_path);
    }

    #[test]
    fn test_separate_patterns_are_separate_chains() {
        let result = ComplexityAnalyzer::default().analyze("MATCH (a)-[:X]->(b), (c)-[:Y]->(d) RETURN d");
        assert_eq!(result.relationship_count, 2);
        assert_eq!(result.max_depth, 1);
        assert_eq!(result.pattern_count, 2);
    }

    #[test]
    fn test_trivial_lookup_is_simple() {
        let result = ComplexityAnalyzer::default().analyze("MATCH (n:Function {id: 'fn:main'}) RETURN n");
        assert!(result.is_simple);
        assert_eq!(result.max_depth, 0);
        assert_eq!(result.pattern_count, 1);
        assert_eq!(result.relationship_count, 0);
        assert!(result.anomaly.is_none());
    }

    #[test]
    fn test_bounded_range_depth() {
        let result = ComplexityAnalyzer::default().analyze(BOUNDED_RANGE);
        assert_eq!(result.max_depth, 5);
        assert!(result.has_variable_length);
        assert!(!result.has_unbounded_path);
        assert!(!result.is_simple);
    }

    #[test]
    fn test_unbounded_forms() {
        for q in [
            "MATCH (a)-[*]->(b) RETURN b",
            "MATCH (a)-[:CALLS*2..]->(b) RETURN b",
            "MATCH p = (a)<-[r:IMPORTS *]-(b) RETURN p",
        ] {
            let result = ComplexityAnalyzer::default().analyze(q);
            assert!(result.has_unbounded_path, "{q}");
            assert_eq!(result.max_depth, UNBOUNDED_DEPTH, "{q}");
        }
    }

    #[test]
    fn test_exact_and_open_lower_ranges() {
        let exact = ComplexityAnalyzer::default().analyze("MATCH (a)-[:CALLS*3]->(b) RETURN b");
        assert_eq!(exact.max_depth, 3);
        assert!(!exact.has_unbounded_path);

        let open_lower = ComplexityAnalyzer::default().analyze("MATCH (a)-[:CALLS*..4]->(b) RETURN b");
        assert_eq!(open_lower.max_depth, 4);
    }

    #[test]
    fn test_bare_arrows_count_as_hops() {
        let result = ComplexityAnalyzer::default().analyze("MATCH (a)-->(b)<--(c)--(d) RETURN d");
        assert_eq!(result.relationship_count, 3);
        assert_eq!(result.max_depth, 3);
    }

    #[test]
    fn test_feature_flags() {
        let result = ComplexityAnalyzer::default().analyze(KITCHEN_SINK);
        assert!(result.has_aggregation);
        assert!(result.has_union);
        assert!(result.has_unbounded_path);
        assert_eq!(result.pattern_count, 3);
    }

    #[test]
    fn test_keywords_inside_literals_ignored() {
        let result =
            ComplexityAnalyzer::default().analyze("MATCH (n {doc: 'count(x) UNION -[*]->'}) RETURN n");
        assert!(!result.has_aggregation);
        assert!(!result.has_union);
        assert!(!result.has_variable_length);
        assert!(result.is_simple);
    }

    #[test]
    fn test_map_commas_are_not_patterns() {
        let result = ComplexityAnalyzer::default().analyze("MATCH (n {a: 1, b: 2}) RETURN n");
        assert_eq!(result.pattern_count, 1);
    }

    #[test]
    fn test_anomalies_score_lowest() {
        let analyzer = ComplexityAnalyzer::default();
        assert_eq!(analyzer.analyze("   ").anomaly, Some(QueryAnomaly::Empty));
        assert_eq!(
            analyzer.analyze("MATCH (a-[:X]->(b) RETURN b").anomaly,
            Some(QueryAnomaly::UnbalancedBrackets)
        );
        let garbage = analyzer.analyze("hello world");
        assert_eq!(garbage.anomaly, Some(QueryAnomaly::Unrecognized));
        assert_eq!(garbage.score, 0.0);
        assert!(garbage.is_simple);
    }

    #[test]
    fn test_pattern_only_input() {
        let result = ComplexityAnalyzer::default().analyze("(a)-[:CALLS]->(b)");
        assert!(result.anomaly.is_none());
        assert_eq!(result.max_depth, 1);
    }

    #[test]
    fn test_threshold_controls_is_simple() {
        let strict = ComplexityAnalyzer::new(2.0).analyze(SINGLE_HOP);
        let lax = ComplexityAnalyzer::new(50.0).analyze(SINGLE_HOP);
        assert!(!strict.is_simple);
        assert!(lax.is_simple);
        assert_eq!(strict.score, lax.score);
    }
}
