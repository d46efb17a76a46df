//! Header/navigation region detection and trigger/menu candidate assembly.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::ScoringWeights;
use crate::platforms::DomEngine;
use crate::snapshot::ElementSnapshot;
use crate::types::{MutationKind, MutationRecord, NodeRef};

// Edge tolerance when growing the region through wrapper elements
const WRAPPER_EDGE_TOLERANCE: f64 = 1.0;

/// Why an element ended up in a candidate list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateReason {
    AncestorPath,
    MutationObserved,
    ClassScan,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub node: NodeRef,
    pub score: i64,
    pub reason: CandidateReason,
    pub change_count: usize,
}

/// Visibility predicate for header/nav regions
pub fn is_region_visible(engine: &dyn DomEngine, node: NodeRef) -> bool {
    if engine.computed_style(node, "display") == "none"
        || engine.computed_style(node, "visibility") == "hidden"
    {
        return false;
    }
    let rect = engine.bounding_rect(node);
    rect.width > 10.0 && rect.height > 30.0 && rect.height < 300.0
}

fn is_nav_visible(engine: &dyn DomEngine, node: NodeRef) -> bool {
    if engine.computed_style(node, "display") == "none"
        || engine.computed_style(node, "visibility") == "hidden"
        || engine.children(node).is_empty()
    {
        return false;
    }
    let rect = engine.bounding_rect(node);
    rect.width > 100.0 && rect.height > 37.0
}

// Off-canvas panels carry both a "mobile" class and a side-panel class.
fn is_mobile_side_panel(engine: &dyn DomEngine, node: NodeRef) -> bool {
    let classes: Vec<String> = engine
        .class_list(node)
        .into_iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let mobile = classes.iter().any(|c| c.contains("mobile"));
    let panel = classes.iter().any(|c| {
        ["side", "panel", "offcanvas", "off-canvas", "drawer"]
            .iter()
            .any(|k| c.contains(k))
    });
    mobile && panel
}

/// Locate the page's header or primary navigation region.
///
/// Returns `None` when nothing qualifies; callers then fall back to whole-document scope.
#[instrument(level = "debug", skip(engine))]
pub fn locate_header(engine: &dyn DomEngine) -> Option<NodeRef> {
    let headers: Vec<NodeRef> = engine
        .query_selector_all(None, "header")
        .unwrap_or_default()
        .into_iter()
        .filter(|h| is_region_visible(engine, *h))
        .collect();

    let found = if headers.len() == 2 {
        let has_class = |node: NodeRef, pred: &dyn Fn(&str) -> bool| {
            engine.class_list(node).iter().any(|c| pred(c))
        };
        let is_top = |c: &str| c.contains("header-top");
        let is_main = |c: &str| c.contains("header") && !c.contains("header-top");
        if has_class(headers[0], &is_top) && has_class(headers[1], &is_main) {
            Some(headers[1])
        } else {
            Some(headers[0])
        }
    } else {
        headers.first().copied()
    };

    let found = found.or_else(|| {
        engine
            .query_selector_all(None, "nav")
            .unwrap_or_default()
            .into_iter()
            .find(|n| !is_mobile_side_panel(engine, *n) && is_nav_visible(engine, *n))
    })?;

    let region = expand_to_outer_container(engine, found);
    debug!(%region, tag = %engine.tag_name(region), "Located navigation region");
    Some(region)
}

/// Walk up while the parent occupies exactly the same box.
pub fn expand_to_outer_container(engine: &dyn DomEngine, node: NodeRef) -> NodeRef {
    let root = engine.document_element();
    let body = engine.body();
    let mut current = node;
    while let Some(parent) = engine.parent(current) {
        if parent == root || Some(parent) == body {
            break;
        }
        let inner = engine.bounding_rect(current);
        let outer = engine.bounding_rect(parent);
        if !inner.same_edges(&outer, WRAPPER_EDGE_TOLERANCE) {
            break;
        }
        current = parent;
    }
    current
}

/// Candidate trigger elements from `from` up to, but excluding, `boundary`.
///
/// Innermost first. Only elements with an id or classes qualify; when none do, the
/// path is just `[from]`.
pub fn build_ancestor_path(
    engine: &dyn DomEngine,
    from: NodeRef,
    boundary: Option<NodeRef>,
) -> Vec<NodeRef> {
    let root = engine.document_element();
    let body = engine.body();
    let mut path = Vec::new();
    let mut current = Some(from);
    while let Some(node) = current {
        if Some(node) == boundary || node == root || Some(node) == body {
            break;
        }
        if engine.id(node).is_some() || !engine.class_list(node).is_empty() {
            path.push(node);
        }
        current = engine.parent(node);
    }
    if path.is_empty() {
        path.push(from);
    }
    path
}

/// Whether the class list or id mentions a menu keyword, or the element is a `<ul>`.
pub fn matches_menu_heuristic(engine: &dyn DomEngine, node: NodeRef, keywords: &[String]) -> bool {
    if engine.tag_name(node) == "ul" {
        return true;
    }
    let id = engine.id(node).unwrap_or_default().to_ascii_lowercase();
    let classes: Vec<String> = engine
        .class_list(node)
        .into_iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();
    keywords.iter().any(|k| {
        let k = k.to_ascii_lowercase();
        id.contains(&k) || classes.iter().any(|c| c.contains(&k))
    })
}

pub fn score_menu_candidate(
    engine: &dyn DomEngine,
    node: NodeRef,
    change_count: usize,
    weights: &ScoringWeights,
) -> i64 {
    let child_count = engine.children(node).len() as i64;
    let bonus = if matches_menu_heuristic(engine, node, &weights.menu_keywords) {
        weights.keyword_bonus
    } else {
        0
    };
    change_count as i64 * weights.change_weight + child_count * weights.child_weight + bonus
}

/// Sort by descending score, keeping encounter order for ties, and drop repeated nodes.
pub fn rank_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.node));
    candidates
}

/// Inputs gathered while the menu was open
pub struct MenuScan<'a> {
    /// The confirmed trigger; it and its ancestors are never menu candidates
    pub target: NodeRef,
    pub records: &'a [MutationRecord],
    /// Closed-state snapshots taken before activation
    pub baseline: &'a [(NodeRef, ElementSnapshot)],
    /// Element the operator rested on inside the open menu, if any
    pub hovered: Option<NodeRef>,
    /// Elements touched by the session itself (outlines, freeze)
    pub ignored: &'a HashSet<NodeRef>,
}

/// Build the ranked menu candidate list from observed mutations, newly visible
/// elements and the hovered element's ancestor path.
#[instrument(level = "debug", skip_all, fields(records = scan.records.len(), baseline = scan.baseline.len()))]
pub fn collect_menu_candidates(
    engine: &dyn DomEngine,
    scan: &MenuScan<'_>,
    weights: &ScoringWeights,
) -> Vec<Candidate> {
    let root = engine.document_element();
    let body = engine.body();
    let eligible = |node: NodeRef| {
        node != root
            && Some(node) != body
            && !scan.ignored.contains(&node)
            && engine.is_connected(node)
            && !engine.contains(node, scan.target)
    };

    let mut order: Vec<NodeRef> = Vec::new();
    let mut counts: HashMap<NodeRef, usize> = HashMap::new();
    let mut bump = |node: NodeRef| {
        let count = counts.entry(node).or_insert(0);
        if *count == 0 {
            order.push(node);
        }
        *count += 1;
    };

    for record in scan.records {
        if eligible(record.target) {
            bump(record.target);
        }
        if let MutationKind::ChildList { added } = &record.kind {
            for node in added {
                if eligible(*node) {
                    bump(*node);
                }
            }
        }
    }

    let mut candidates: Vec<Candidate> = order
        .iter()
        .filter(|node| is_shown(engine, **node))
        .map(|node| {
            let change_count = counts.get(node).copied().unwrap_or(0);
            Candidate {
                node: *node,
                score: score_menu_candidate(engine, *node, change_count, weights),
                reason: CandidateReason::MutationObserved,
                change_count,
            }
        })
        .collect();

    for (node, closed) in scan.baseline {
        if counts.contains_key(node) || !eligible(*node) || closed.is_visible() {
            continue;
        }
        if is_shown(engine, *node) {
            candidates.push(Candidate {
                node: *node,
                score: score_menu_candidate(engine, *node, 1, weights),
                reason: CandidateReason::ClassScan,
                change_count: 1,
            });
        }
    }

    if let Some(hovered) = scan.hovered {
        for node in build_ancestor_path(engine, hovered, None) {
            if !eligible(node) {
                continue;
            }
            let change_count = counts.get(&node).copied().unwrap_or(0);
            candidates.push(Candidate {
                node,
                score: score_menu_candidate(engine, node, change_count, weights),
                reason: CandidateReason::AncestorPath,
                change_count,
            });
        }
    }

    let ranked = rank_candidates(candidates);
    debug!(count = ranked.len(), "Collected menu candidates");
    ranked
}

fn is_shown(engine: &dyn DomEngine, node: NodeRef) -> bool {
    ElementSnapshot::capture(engine, Some(node)).is_some_and(|s| s.is_visible())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::HeadlessDom;
    use crate::types::Rect;

    #[test]
    fn test_scoring_weights_and_order() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let menu = dom.create_element(body, "div", &[("class", "dropdown")]);
        dom.create_element(menu, "a", &[]);
        dom.create_element(menu, "a", &[]);
        let plain = dom.create_element(body, "div", &[("class", "banner")]);

        let weights = ScoringWeights::default();
        let a = score_menu_candidate(&dom, menu, 4, &weights);
        let b = score_menu_candidate(&dom, plain, 10, &weights);
        assert_eq!(a, 24);
        assert_eq!(b, 20);

        let ranked = rank_candidates(vec![
            Candidate {
                node: plain,
                score: b,
                reason: CandidateReason::MutationObserved,
                change_count: 10,
            },
            Candidate {
                node: menu,
                score: a,
                reason: CandidateReason::MutationObserved,
                change_count: 4,
            },
        ]);
        assert_eq!(ranked[0].node, menu);
        assert_eq!(ranked[1].node, plain);
    }

    #[test]
    fn test_rank_is_stable_for_ties_and_dedupes() {
        let c = |i: usize, score: i64| Candidate {
            node: NodeRef::new(i),
            score,
            reason: CandidateReason::AncestorPath,
            change_count: 0,
        };
        let ranked = rank_candidates(vec![c(5, 3), c(6, 3), c(5, 1), c(7, 9)]);
        let nodes: Vec<usize> = ranked.iter().map(|c| c.node.index()).collect();
        assert_eq!(nodes, vec![7, 5, 6]);
    }

    #[test]
    fn test_two_tier_header_prefers_main_header() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let top = dom.create_element(body, "header", &[("class", "header-top")]);
        let main = dom.create_element(body, "header", &[("class", "header")]);
        dom.set_rect(top, Rect::new(0.0, 0.0, 1280.0, 40.0));
        dom.set_rect(main, Rect::new(0.0, 40.0, 1280.0, 80.0));
        assert_eq!(locate_header(&dom), Some(main));
    }

    #[test]
    fn test_invisible_header_falls_back_to_nav() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let header = dom.create_element(body, "header", &[]);
        dom.set_rect(header, Rect::new(0.0, 0.0, 1280.0, 400.0));

        let drawer = dom.create_element(body, "nav", &[("class", "mobile-menu side-panel")]);
        dom.create_element(drawer, "a", &[]);
        dom.set_rect(drawer, Rect::new(0.0, 0.0, 300.0, 800.0));

        let nav = dom.create_element(body, "nav", &[("class", "main-nav")]);
        dom.create_element(nav, "a", &[]);
        dom.set_rect(nav, Rect::new(0.0, 0.0, 900.0, 60.0));

        assert_eq!(locate_header(&dom), Some(nav));
    }

    #[test]
    fn test_no_region_returns_none() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        dom.create_element(body, "main", &[]);
        assert_eq!(locate_header(&dom), None);
    }

    #[test]
    fn test_region_expands_through_identical_wrappers() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let outer = dom.create_element(body, "div", &[("class", "sticky")]);
        let inner = dom.create_element(outer, "div", &[("class", "wrap")]);
        let header = dom.create_element(inner, "header", &[]);
        let rect = Rect::new(0.0, 0.0, 1280.0, 90.0);
        dom.set_rect(outer, rect);
        dom.set_rect(inner, Rect::new(0.0, 0.0, 1280.5, 90.0));
        dom.set_rect(header, rect);
        assert_eq!(locate_header(&dom), Some(outer));
    }

    #[test]
    fn test_ancestor_path_innermost_first() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let header = dom.create_element(body, "header", &[("id", "top")]);
        let item = dom.create_element(header, "li", &[("class", "menu-item")]);
        let bare = dom.create_element(item, "div", &[]);
        let link = dom.create_element(bare, "a", &[("class", "menu-link")]);
        let span = dom.create_element(link, "span", &[]);

        assert_eq!(build_ancestor_path(&dom, span, Some(header)), vec![link, item]);
        let lone = dom.create_element(header, "span", &[]);
        assert_eq!(build_ancestor_path(&dom, lone, Some(header)), vec![lone]);
    }

    #[test]
    fn test_collect_excludes_target_and_ancestors() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let header = dom.create_element(body, "header", &[("class", "site-header")]);
        let button = dom.create_element(header, "button", &[("class", "menu-toggle")]);
        let nav = dom.create_element(header, "nav", &[("class", "nav-menu")]);
        dom.create_element(nav, "a", &[]);

        let observer = dom.observe(dom.document_element()).unwrap();
        dom.set_attribute(button, "aria-expanded", "true").unwrap();
        dom.set_attribute(header, "class", "site-header menu-opened").unwrap();
        dom.set_attribute(nav, "class", "nav-menu is-open").unwrap();
        let records = dom.take_records(observer);

        let ignored = HashSet::new();
        let candidates = collect_menu_candidates(
            &dom,
            &MenuScan {
                target: button,
                records: &records,
                baseline: &[],
                hovered: None,
                ignored: &ignored,
            },
            &ScoringWeights::default(),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].node, nav);
        assert_eq!(candidates[0].score, 2 + 3 + 10);
    }
}
