//! CSS selector generation for discovered elements, plus the small selector grammar
//! understood by the headless engine.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::errors::{DiscoveryError, Result};
use crate::platforms::DomEngine;
use crate::types::NodeRef;

/// Ids usable as `#id` without escaping surprises
static ID_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][\w-]*$").expect("valid id pattern"));

/// Class names we are willing to put in a selector
static CLASS_SYNTAX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?[_a-zA-Z][\w-]*$").expect("valid class pattern"));

/// Classes that describe transient UI state rather than identity
static STATE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:is|has)-|^(?:active|open|show|visible|expanded|hover|focus|selected|current)(?:$|[-_])|[-_](?:active|open|show|visible|expanded|hover|focus|selected|current)$",
    )
    .expect("valid state class pattern")
});

pub fn is_valid_id(id: &str) -> bool {
    ID_SYNTAX.is_match(id)
}

pub fn is_safe_class(class: &str) -> bool {
    CLASS_SYNTAX.is_match(class)
}

/// True for classes like `is-open`, `active`, `menu-expanded` whose presence tracks UI state.
pub fn is_state_class(class: &str) -> bool {
    STATE_CLASS.is_match(class)
}

/// Whole-token keyword test: `class` equals `keyword`, or carries it as a
/// `-`/`_` separated prefix or suffix.
pub fn class_matches_keyword(class: &str, keyword: &str) -> bool {
    let class = class.to_ascii_lowercase();
    let keyword = keyword.to_ascii_lowercase();
    if class == keyword {
        return true;
    }
    if let Some(rest) = class.strip_prefix(keyword.as_str()) {
        if rest.starts_with('-') || rest.starts_with('_') {
            return true;
        }
    }
    if let Some(rest) = class.strip_suffix(keyword.as_str()) {
        if rest.ends_with('-') || rest.ends_with('_') {
            return true;
        }
    }
    false
}

/// Safe classes that are not state-like, in DOM order
pub fn meaningful_classes(classes: &[String]) -> Vec<String> {
    classes
        .iter()
        .filter(|c| is_safe_class(c) && !is_state_class(c))
        .cloned()
        .collect()
}

/// Escape an identifier the way `CSS.escape` does.
pub fn css_escape(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &ch) in chars.iter().enumerate() {
        let code = ch as u32;
        if ch == '\0' {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && ch.is_ascii_digit())
            || (i == 1 && ch.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{code:x} "));
        } else if i == 0 && ch == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('\\');
            out.push(ch);
        }
    }
    out
}

/// Quote a value for use inside an attribute selector
pub fn css_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\a "),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// Builds CSS selectors that identify a single element, best effort.
pub struct SelectorGenerator<'a> {
    engine: &'a dyn DomEngine,
}

impl<'a> SelectorGenerator<'a> {
    pub fn new(engine: &'a dyn DomEngine) -> Self {
        Self { engine }
    }

    /// Selector for `node`, or `None` when the node is the document root or detached.
    ///
    /// Strategy order: unique `#id`, unique class compound (longest first, falling back to
    /// the full compound), unique `data-*`/`aria-label` attribute, `#ancestorId tag`,
    /// positional path.
    pub fn generate(&self, node: NodeRef) -> Option<String> {
        let root = self.engine.document_element();
        if node == root || self.engine.parent(node).is_none() {
            return None;
        }

        if let Some(id) = self.engine.id(node) {
            if is_valid_id(&id) {
                let selector = format!("#{}", css_escape(&id));
                if self.is_unique(&selector, node) {
                    return Some(selector);
                }
            }
        }

        let classes = meaningful_classes(&self.engine.class_list(node));
        if !classes.is_empty() {
            for len in (1..=classes.len()).rev() {
                let selector = class_compound(&classes[..len]);
                if self.is_unique(&selector, node) {
                    return Some(selector);
                }
            }
            return Some(class_compound(&classes));
        }

        if let Some(selector) = self.unique_attribute_selector(node) {
            return Some(selector);
        }

        if let Some(ancestor_id) = self.nearest_ancestor_id(node) {
            let selector = format!(
                "#{} {}",
                css_escape(&ancestor_id),
                self.engine.tag_name(node)
            );
            debug!(%selector, "Using ancestor-id selector without uniqueness guarantee");
            return Some(selector);
        }

        self.css_path(node)
    }

    /// Positional path from `node` up to, but excluding, `<body>`.
    pub fn css_path(&self, node: NodeRef) -> Option<String> {
        let root = self.engine.document_element();
        let body = self.engine.body();
        if node == root || self.engine.parent(node).is_none() {
            return None;
        }

        let mut segments: Vec<String> = Vec::new();
        let mut current = Some(node);
        while let Some(element) = current {
            if element == root || Some(element) == body {
                break;
            }

            if let Some(id) = self.engine.id(element).filter(|id| is_valid_id(id)) {
                segments.push(format!("#{}", css_escape(&id)));
                break;
            }

            let tag = self.engine.tag_name(element);
            let mut segment = tag.clone();
            let classes = meaningful_classes(&self.engine.class_list(element));
            for class in classes.iter().take(2) {
                segment.push('.');
                segment.push_str(&css_escape(class));
            }

            if let Some(parent) = self.engine.parent(element) {
                let same_tag: Vec<NodeRef> = self
                    .engine
                    .children(parent)
                    .into_iter()
                    .filter(|sibling| self.engine.tag_name(*sibling) == tag)
                    .collect();
                if same_tag.len() > 1 {
                    if let Some(position) = same_tag.iter().position(|s| *s == element) {
                        segment.push_str(&format!(":nth-of-type({})", position + 1));
                    }
                }
            }

            segments.push(segment);
            current = self.engine.parent(element);
        }

        if segments.is_empty() {
            return Some(self.engine.tag_name(node));
        }
        segments.reverse();
        Some(segments.join(" > "))
    }

    fn unique_attribute_selector(&self, node: NodeRef) -> Option<String> {
        for name in self.engine.attribute_names(node) {
            if !name.starts_with("data-") || !is_safe_class(&name) {
                continue;
            }
            let Some(value) = self.engine.get_attribute(node, &name) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let selector = format!("[{}={}]", name, css_string(&value));
            if self.is_unique(&selector, node) {
                return Some(selector);
            }
        }

        let label = self.engine.get_attribute(node, "aria-label")?;
        if label.is_empty() {
            return None;
        }
        let selector = format!("[aria-label={}]", css_string(&label));
        self.is_unique(&selector, node).then_some(selector)
    }

    fn nearest_ancestor_id(&self, node: NodeRef) -> Option<String> {
        let mut current = self.engine.parent(node);
        while let Some(ancestor) = current {
            if let Some(id) = self.engine.id(ancestor).filter(|id| is_valid_id(id)) {
                return Some(id);
            }
            current = self.engine.parent(ancestor);
        }
        None
    }

    fn is_unique(&self, selector: &str, node: NodeRef) -> bool {
        match self.engine.query_selector_all(None, selector) {
            Ok(matches) => matches.len() == 1 && matches[0] == node,
            Err(e) => {
                debug!(%selector, error = %e, "Selector query failed, treating as no match");
                false
            }
        }
    }
}

fn class_compound(classes: &[String]) -> String {
    classes
        .iter()
        .map(|c| format!(".{}", css_escape(c)))
        .collect::<String>()
}

// ============== SELECTOR GRAMMAR ==============

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttributeCondition {
    Exists(String),
    Equals(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CompoundSelector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeCondition>,
    pub nth_of_type: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorPart {
    pub compound: CompoundSelector,
    // Relation to the part on the left.
    pub combinator: Option<Combinator>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ComplexSelector {
    pub parts: Vec<SelectorPart>,
}

/// Parse a comma-separated selector list.
pub(crate) fn parse_selector_list(input: &str) -> Result<Vec<ComplexSelector>> {
    let invalid = || DiscoveryError::InvalidSelector(input.to_string());
    let groups = split_groups(input).ok_or_else(invalid)?;
    groups
        .iter()
        .map(|group| parse_complex(group).ok_or_else(invalid))
        .collect()
}

fn split_groups(input: &str) -> Option<Vec<String>> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut bracket_depth = 0usize;
    let mut paren_depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (_, '\\') => {
                current.push(ch);
                current.push(chars.next()?);
            }
            (Some(q), _) if ch == q => {
                quote = None;
                current.push(ch);
            }
            (Some(_), _) => current.push(ch),
            (None, '"') | (None, '\'') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '[') => {
                bracket_depth += 1;
                current.push(ch);
            }
            (None, ']') => {
                bracket_depth = bracket_depth.checked_sub(1)?;
                current.push(ch);
            }
            (None, '(') => {
                paren_depth += 1;
                current.push(ch);
            }
            (None, ')') => {
                paren_depth = paren_depth.checked_sub(1)?;
                current.push(ch);
            }
            (None, ',') if bracket_depth == 0 && paren_depth == 0 => {
                let trimmed = current.trim();
                if trimmed.is_empty() {
                    return None;
                }
                groups.push(trimmed.to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if quote.is_some() || bracket_depth != 0 || paren_depth != 0 {
        return None;
    }
    let trimmed = current.trim();
    if trimmed.is_empty() {
        return None;
    }
    groups.push(trimmed.to_string());
    Some(groups)
}

fn parse_complex(input: &str) -> Option<ComplexSelector> {
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;
    let mut parts: Vec<SelectorPart> = Vec::new();
    let mut combinator: Option<Combinator> = None;

    loop {
        let had_space = skip_whitespace(&chars, &mut i);
        if i >= chars.len() {
            break;
        }
        if chars[i] == '>' {
            if parts.is_empty() || combinator == Some(Combinator::Child) {
                return None;
            }
            combinator = Some(Combinator::Child);
            i += 1;
            continue;
        }
        if !parts.is_empty() && combinator.is_none() {
            if !had_space {
                return None;
            }
            combinator = Some(Combinator::Descendant);
        }
        let compound = parse_compound(&chars, &mut i)?;
        parts.push(SelectorPart {
            compound,
            combinator: combinator.take(),
        });
    }

    if parts.is_empty() || combinator.is_some() {
        return None;
    }
    Some(ComplexSelector { parts })
}

fn skip_whitespace(chars: &[char], i: &mut usize) -> bool {
    let start = *i;
    while *i < chars.len() && chars[*i].is_whitespace() {
        *i += 1;
    }
    *i > start
}

fn parse_compound(chars: &[char], i: &mut usize) -> Option<CompoundSelector> {
    let mut compound = CompoundSelector::default();
    let mut universal = false;
    let start = *i;

    while *i < chars.len() && !chars[*i].is_whitespace() && chars[*i] != '>' {
        match chars[*i] {
            '*' => {
                if *i != start {
                    return None;
                }
                universal = true;
                *i += 1;
            }
            '#' => {
                *i += 1;
                let id = parse_ident(chars, i)?;
                if compound.id.replace(id).is_some() {
                    return None;
                }
            }
            '.' => {
                *i += 1;
                compound.classes.push(parse_ident(chars, i)?);
            }
            '[' => {
                *i += 1;
                compound.attributes.push(parse_attribute(chars, i)?);
            }
            ':' => {
                *i += 1;
                let name = parse_ident(chars, i)?;
                if name != "nth-of-type" || chars.get(*i) != Some(&'(') {
                    return None;
                }
                *i += 1;
                let digits_start = *i;
                while *i < chars.len() && chars[*i].is_ascii_digit() {
                    *i += 1;
                }
                let index: usize = chars[digits_start..*i]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .ok()?;
                if chars.get(*i) != Some(&')') || index == 0 {
                    return None;
                }
                *i += 1;
                compound.nth_of_type = Some(index);
            }
            _ => {
                if *i != start || universal {
                    return None;
                }
                compound.tag = Some(parse_ident(chars, i)?.to_ascii_lowercase());
            }
        }
    }

    let empty = compound.tag.is_none()
        && compound.id.is_none()
        && compound.classes.is_empty()
        && compound.attributes.is_empty()
        && compound.nth_of_type.is_none();
    if empty && !universal {
        return None;
    }
    Some(compound)
}

fn parse_attribute(chars: &[char], i: &mut usize) -> Option<AttributeCondition> {
    skip_whitespace(chars, i);
    let name = parse_ident(chars, i)?.to_ascii_lowercase();
    skip_whitespace(chars, i);
    match chars.get(*i)? {
        ']' => {
            *i += 1;
            Some(AttributeCondition::Exists(name))
        }
        '=' => {
            *i += 1;
            skip_whitespace(chars, i);
            let value = match chars.get(*i)? {
                '"' | '\'' => parse_quoted(chars, i)?,
                _ => parse_ident(chars, i)?,
            };
            skip_whitespace(chars, i);
            if chars.get(*i) != Some(&']') {
                return None;
            }
            *i += 1;
            Some(AttributeCondition::Equals(name, value))
        }
        _ => None,
    }
}

fn parse_quoted(chars: &[char], i: &mut usize) -> Option<String> {
    let quote = chars[*i];
    *i += 1;
    let mut out = String::new();
    while *i < chars.len() {
        let ch = chars[*i];
        if ch == quote {
            *i += 1;
            return Some(out);
        }
        if ch == '\\' {
            *i += 1;
            out.push(parse_escape(chars, i)?);
            continue;
        }
        out.push(ch);
        *i += 1;
    }
    None
}

fn parse_ident(chars: &[char], i: &mut usize) -> Option<String> {
    let mut out = String::new();
    while *i < chars.len() {
        let ch = chars[*i];
        if ch == '\\' {
            *i += 1;
            out.push(parse_escape(chars, i)?);
        } else if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || (ch as u32) >= 0x80 {
            if out.is_empty() && ch.is_ascii_digit() {
                return None;
            }
            out.push(ch);
            *i += 1;
        } else {
            break;
        }
    }
    (!out.is_empty()).then_some(out)
}

// Called with `i` just past the backslash.
fn parse_escape(chars: &[char], i: &mut usize) -> Option<char> {
    let first = *chars.get(*i)?;
    if !first.is_ascii_hexdigit() {
        *i += 1;
        return Some(first);
    }
    let start = *i;
    while *i < chars.len() && *i - start < 6 && chars[*i].is_ascii_hexdigit() {
        *i += 1;
    }
    let hex: String = chars[start..*i].iter().collect();
    if chars.get(*i).is_some_and(|c| c.is_whitespace()) {
        *i += 1;
    }
    let code = u32::from_str_radix(&hex, 16).ok()?;
    Some(char::from_u32(code).unwrap_or('\u{FFFD}'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::HeadlessDom;

    #[test]
    fn test_state_class_detection() {
        for class in ["is-open", "has-dropdown", "active", "menu-open", "nav_expanded", "show"] {
            assert!(is_state_class(class), "{class} should be state-like");
        }
        for class in ["nav-menu", "menu-toggle", "showcase", "opener", "header"] {
            assert!(!is_state_class(class), "{class} should be meaningful");
        }
    }

    #[test]
    fn test_class_keyword_matching_is_whole_token() {
        assert!(class_matches_keyword("open", "open"));
        assert!(class_matches_keyword("is-open", "open"));
        assert!(class_matches_keyword("open_now", "open"));
        assert!(!class_matches_keyword("reopened", "open"));
        assert!(!class_matches_keyword("opener", "open"));
    }

    #[test]
    fn test_css_escape() {
        assert_eq!(css_escape("main-nav"), "main-nav");
        assert_eq!(css_escape("1st"), "\\31 st");
        assert_eq!(css_escape("a:b"), "a\\:b");
        assert_eq!(css_escape("-"), "\\-");
    }

    #[test]
    fn test_parse_selector_list() {
        let parsed = parse_selector_list("#main > ul.menu li:nth-of-type(2), [data-x=\"a b\"]")
            .expect("selector should parse");
        assert_eq!(parsed.len(), 2);
        let first = &parsed[0].parts;
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].compound.id.as_deref(), Some("main"));
        assert_eq!(first[1].combinator, Some(Combinator::Child));
        assert_eq!(first[1].compound.classes, vec!["menu".to_string()]);
        assert_eq!(first[2].combinator, Some(Combinator::Descendant));
        assert_eq!(first[2].compound.nth_of_type, Some(2));
        assert_eq!(
            parsed[1].parts[0].compound.attributes,
            vec![AttributeCondition::Equals("data-x".into(), "a b".into())]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_selectors() {
        for bad in ["", "div >", "> div", ".", "#1abc", "[data-x", "a:hover", "div,,p"] {
            assert!(parse_selector_list(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_escaped_identifiers_round_trip_through_parser() {
        let parsed = parse_selector_list(&format!(".{}", css_escape("md:flex"))).unwrap();
        assert_eq!(parsed[0].parts[0].compound.classes, vec!["md:flex".to_string()]);
    }

    #[test]
    fn test_unique_id_wins() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let button = dom.create_element(body, "button", &[("id", "burger"), ("class", "btn")]);
        let generator = SelectorGenerator::new(&dom);
        let selector = generator.generate(button).unwrap();
        assert_eq!(selector, "#burger");
        assert_eq!(dom.query_selector_all(None, &selector).unwrap(), vec![button]);
    }

    #[test]
    fn test_duplicate_id_falls_through_to_classes() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        dom.create_element(body, "div", &[("id", "dup")]);
        let target = dom.create_element(body, "div", &[("id", "dup"), ("class", "panel")]);
        let generator = SelectorGenerator::new(&dom);
        assert_eq!(generator.generate(target).as_deref(), Some(".panel"));
    }

    #[test]
    fn test_state_classes_are_skipped_and_prefixes_shortened() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        dom.create_element(body, "div", &[("class", "nav primary")]);
        let target = dom.create_element(body, "div", &[("class", "nav is-open")]);
        let generator = SelectorGenerator::new(&dom);
        // ".nav" matches two elements, "is-open" is excluded: full compound returned anyway
        assert_eq!(generator.generate(target).as_deref(), Some(".nav"));

        let other = dom.create_element(body, "div", &[("class", "submenu active extra")]);
        assert_eq!(generator.generate(other).as_deref(), Some(".submenu.extra"));
    }

    #[test]
    fn test_data_attribute_and_ancestor_id_fallbacks() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let header = dom.create_element(body, "header", &[("id", "top")]);
        let tagged = dom.create_element(header, "button", &[("data-role", "toggle")]);
        let plain = dom.create_element(header, "span", &[]);
        let generator = SelectorGenerator::new(&dom);
        assert_eq!(
            generator.generate(tagged).as_deref(),
            Some("[data-role=\"toggle\"]")
        );
        assert_eq!(generator.generate(plain).as_deref(), Some("#top span"));
    }

    #[test]
    fn test_unsafe_class_names_are_skipped() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let card = dom.create_element(body, "div", &[("class", "md:flex 2col card")]);
        let utility_only = dom.create_element(body, "div", &[("class", "md:flex 2col")]);
        let generator = SelectorGenerator::new(&dom);

        assert_eq!(generator.generate(card).as_deref(), Some(".card"));

        let selector = generator.generate(utility_only).unwrap();
        assert_eq!(selector, "div:nth-of-type(2)");
        assert_eq!(dom.query_selector_all(None, &selector).unwrap(), vec![utility_only]);
    }

    #[test]
    fn test_css_path_fallback_uses_nth_of_type() {
        let dom = HeadlessDom::new();
        let body = dom.body().unwrap();
        let list = dom.create_element(body, "ul", &[]);
        dom.create_element(list, "li", &[]);
        let second = dom.create_element(list, "li", &[]);
        let generator = SelectorGenerator::new(&dom);
        let selector = generator.generate(second).unwrap();
        assert_eq!(selector, "ul > li:nth-of-type(2)");
        assert_eq!(dom.query_selector_all(None, &selector).unwrap(), vec![second]);
    }

    #[test]
    fn test_root_has_no_selector() {
        let dom = HeadlessDom::new();
        let generator = SelectorGenerator::new(&dom);
        assert_eq!(generator.generate(dom.document_element()), None);
    }
}
