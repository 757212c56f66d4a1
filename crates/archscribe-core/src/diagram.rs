// ABOUTME: Builds and extends draw.io documents from fragments of sibling mxCell elements.
// ABOUTME: Detects truncated fragments, validates referential integrity, and merges cells into the document root.

use std::collections::HashSet;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Id of the implicit root cell.
pub const ROOT_CELL_ID: &str = "0";
/// Id of the implicit default layer, the usual parent for top-level cells.
pub const LAYER_CELL_ID: &str = "1";

const ROOT_CLOSE: &str = "</root>";
const TAIL_CHARS: usize = 200;

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<mxCell[^>]*>").expect("valid open tag regex"));
static SELF_CLOSING_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<mxCell[^>]*/>").expect("valid self-closing regex"));

/// Reasons a fragment could not become (part of) a document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiagramError {
    #[error("fragment is truncated; last 200 chars: {tail}")]
    Truncated { tail: String },

    #[error("{0}")]
    Invalid(String),

    #[error("no existing diagram to append to")]
    NoExistingDiagram,

    #[error("no cells could be appended: {}", .errors.join("; "))]
    NothingAppended { errors: Vec<String> },
}

impl DiagramError {
    pub fn is_truncated(&self) -> bool {
        matches!(self, DiagramError::Truncated { .. })
    }
}

/// A serialized draw.io document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramDocument {
    xml: String,
    cell_count: usize,
}

/// Result of a successful append. `rejected` lists per-cell problems that
/// did not prevent the other cells from being merged.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub document: DiagramDocument,
    pub appended: usize,
    pub rejected: Vec<String>,
}

/// One top-level mxCell parsed out of a fragment.
#[derive(Debug, Clone)]
struct CellSpan {
    id: Option<String>,
    parent: Option<String>,
    source: Option<String>,
    target: Option<String>,
    markup: String,
}

impl CellSpan {
    fn references(&self) -> impl Iterator<Item = (&'static str, &String)> {
        [
            ("parent", self.parent.as_ref()),
            ("source", self.source.as_ref()),
            ("target", self.target.as_ref()),
        ]
        .into_iter()
        .filter_map(|(attr, value)| value.map(|v| (attr, v)))
    }
}

/// True when the fragment ends on a tag and every opened mxCell is closed.
/// A self-closing tag counts once as opened and once as closed.
pub fn is_fragment_complete(fragment: &str) -> bool {
    let trimmed = fragment.trim();
    if !trimmed.ends_with('>') {
        return false;
    }
    let opened = OPEN_TAG.find_iter(trimmed).count();
    let closed =
        trimmed.matches("</mxCell>").count() + SELF_CLOSING_TAG.find_iter(trimmed).count();
    opened == closed
}

fn truncated(fragment: &str) -> DiagramError {
    let chars: Vec<char> = fragment.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(TAIL_CHARS)..].iter().collect();
    DiagramError::Truncated { tail }
}

impl DiagramDocument {
    /// Create a document from a fragment of sibling cells. The whole
    /// fragment must be valid; nothing is partially accepted.
    pub fn initialize(fragment: &str) -> Result<Self, DiagramError> {
        if fragment.trim().is_empty() {
            return Err(DiagramError::Invalid("XML is empty".to_string()));
        }
        if !is_fragment_complete(fragment) {
            return Err(truncated(fragment));
        }
        check_fragment_shape(fragment)?;

        let cells = parse_top_level_cells(fragment)?;
        let mut known: HashSet<String> = [ROOT_CELL_ID, LAYER_CELL_ID]
            .into_iter()
            .map(String::from)
            .collect();
        let mut seen = HashSet::new();
        for cell in &cells {
            let id = cell_id(cell)?;
            if !seen.insert(id.to_string()) {
                return Err(DiagramError::Invalid(format!("duplicate cell id \"{id}\"")));
            }
            if cell.parent.is_none() {
                return Err(DiagramError::Invalid(format!(
                    "cell \"{id}\" is missing a parent attribute"
                )));
            }
        }

        let (accepted, unresolved) = resolve_in_order(&cells, &mut known);
        if let Some(problem) = unresolved.into_iter().next() {
            return Err(DiagramError::Invalid(problem));
        }

        let body = accepted
            .iter()
            .map(|&i| cells[i].markup.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Self {
            xml: wrap_document(&body),
            cell_count: accepted.len(),
        })
    }

    /// Parse a previously serialized document.
    pub fn from_xml(xml: impl Into<String>) -> Result<Self, DiagramError> {
        let xml = xml.into();
        if !xml.contains(ROOT_CLOSE) {
            return Err(DiagramError::Invalid(
                "document has no <root> element".to_string(),
            ));
        }
        let cell_count = all_cell_ids(&xml)?
            .iter()
            .filter(|id| !is_reserved(id))
            .count();
        Ok(Self { xml, cell_count })
    }

    pub fn as_xml(&self) -> &str {
        &self.xml
    }

    pub fn into_xml(self) -> String {
        self.xml
    }

    /// Number of cells excluding the implicit root and layer.
    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Every cell id in the document, the root and layer included.
    pub fn cell_ids(&self) -> Result<Vec<String>, DiagramError> {
        all_cell_ids(&self.xml)
    }

    /// Merge a fragment's cells into a copy of this document. Cells with a
    /// missing or duplicate id, or a reference that does not resolve, are
    /// rejected individually; the call fails only when nothing was merged.
    pub fn append(&self, fragment: &str) -> Result<AppendOutcome, DiagramError> {
        if fragment.trim().is_empty() {
            return Err(DiagramError::Invalid("XML is empty".to_string()));
        }
        if !is_fragment_complete(fragment) {
            return Err(truncated(fragment));
        }
        check_fragment_shape(fragment)?;
        let cells = parse_top_level_cells(fragment)?;

        let mut known: HashSet<String> = self.cell_ids()?.into_iter().collect();
        let mut rejected = Vec::new();
        let mut candidates = Vec::new();
        let mut fragment_ids = HashSet::new();
        for (i, cell) in cells.iter().enumerate() {
            let Some(id) = cell.id.as_deref().filter(|id| !id.is_empty()) else {
                rejected.push(format!("cell #{} is missing an id attribute", i + 1));
                continue;
            };
            if known.contains(id) || !fragment_ids.insert(id.to_string()) {
                rejected.push(format!("duplicate cell id \"{id}\""));
                continue;
            }
            if cell.parent.is_none() {
                rejected.push(format!("cell \"{id}\" is missing a parent attribute"));
                continue;
            }
            candidates.push(cell.clone());
        }

        let (accepted, unresolved) = resolve_in_order(&candidates, &mut known);
        rejected.extend(unresolved);

        if accepted.is_empty() {
            return Err(DiagramError::NothingAppended { errors: rejected });
        }

        let insert_at = self.xml.rfind(ROOT_CLOSE).ok_or_else(|| {
            DiagramError::Invalid("document has no </root> element".to_string())
        })?;
        let line_start = self.xml[..insert_at].rfind('\n').map_or(insert_at, |i| i + 1);
        let body = accepted
            .iter()
            .map(|&i| candidates[i].markup.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let mut xml = String::with_capacity(self.xml.len() + body.len() + 1);
        xml.push_str(&self.xml[..line_start]);
        xml.push_str(&body);
        xml.push('\n');
        xml.push_str(&self.xml[line_start..]);

        Ok(AppendOutcome {
            document: Self {
                xml,
                cell_count: self.cell_count + accepted.len(),
            },
            appended: accepted.len(),
            rejected,
        })
    }
}

/// Initialize or extend. Appending requires an existing document.
pub fn append_to(
    current: Option<&DiagramDocument>,
    fragment: &str,
) -> Result<AppendOutcome, DiagramError> {
    if fragment.trim().is_empty() {
        return Err(DiagramError::Invalid("XML is empty".to_string()));
    }
    if !is_fragment_complete(fragment) {
        return Err(truncated(fragment));
    }
    match current {
        Some(document) => document.append(fragment),
        None => Err(DiagramError::NoExistingDiagram),
    }
}

fn is_reserved(id: &str) -> bool {
    id == ROOT_CELL_ID || id == LAYER_CELL_ID
}

fn cell_id(cell: &CellSpan) -> Result<&str, DiagramError> {
    cell.id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DiagramError::Invalid("every mxCell needs an id attribute".to_string()))
}

fn check_fragment_shape(fragment: &str) -> Result<(), DiagramError> {
    if !fragment.contains("<mxCell") {
        return Err(DiagramError::Invalid(
            "XML must contain at least one mxCell element".to_string(),
        ));
    }
    if fragment.contains("<mxfile") || fragment.contains("<mxGraphModel") || fragment.contains("<root")
    {
        return Err(DiagramError::Invalid(
            "XML should contain ONLY mxCell elements, no wrapper tags".to_string(),
        ));
    }
    Ok(())
}

/// Accept cells whose references resolve against `known` or against other
/// accepted cells of the same fragment. Returns accepted indices in
/// fragment order plus one error per unresolved cell.
fn resolve_in_order(cells: &[CellSpan], known: &mut HashSet<String>) -> (Vec<usize>, Vec<String>) {
    let mut reserved_errors = Vec::new();
    let mut pending: Vec<usize> = Vec::new();
    for (i, cell) in cells.iter().enumerate() {
        match cell.id.as_deref() {
            Some(id) if is_reserved(id) => reserved_errors.push(format!(
                "XML should not include root cells (id=\"{ROOT_CELL_ID}\" or id=\"{LAYER_CELL_ID}\")"
            )),
            _ => pending.push(i),
        }
    }

    let mut accepted = Vec::new();
    loop {
        let before = pending.len();
        pending.retain(|&i| {
            let cell = &cells[i];
            if cell.references().all(|(_, target)| known.contains(target)) {
                if let Some(id) = &cell.id {
                    known.insert(id.clone());
                }
                accepted.push(i);
                false
            } else {
                true
            }
        });
        if pending.len() == before {
            break;
        }
    }
    accepted.sort_unstable();

    let mut errors = reserved_errors;
    for i in pending {
        let cell = &cells[i];
        let id = cell.id.as_deref().unwrap_or("?");
        for (attr, target) in cell.references() {
            if !known.contains(target) {
                errors.push(format!(
                    "cell \"{id}\" {attr} \"{target}\" does not reference an existing cell"
                ));
            }
        }
    }
    (accepted, errors)
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .map(|attr| match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        })
}

fn span_from(element: &BytesStart<'_>, markup: &str) -> CellSpan {
    CellSpan {
        id: attribute(element, b"id"),
        parent: attribute(element, b"parent"),
        source: attribute(element, b"source"),
        target: attribute(element, b"target"),
        markup: markup.to_string(),
    }
}

fn parse_error(err: impl std::fmt::Display) -> DiagramError {
    DiagramError::Invalid(format!("XML is not well-formed: {err}"))
}

/// Parse the sibling mxCell elements of a fragment, keeping each one's raw markup.
fn parse_top_level_cells(fragment: &str) -> Result<Vec<CellSpan>, DiagramError> {
    let wrapped = format!("<fragment>{fragment}</fragment>");
    let mut reader = Reader::from_str(&wrapped);
    let mut cells = Vec::new();
    let mut depth = 0usize;
    let mut open_cell: Option<(usize, BytesStart<'static>)> = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event().map_err(parse_error)? {
            Event::Start(element) => {
                depth += 1;
                if depth == 2 {
                    if element.name().as_ref() != b"mxCell" {
                        return Err(DiagramError::Invalid(
                            "XML should contain ONLY mxCell elements at the top level".to_string(),
                        ));
                    }
                    open_cell = Some((before, element.into_owned()));
                } else if depth > 2 && element.name().as_ref() == b"mxCell" {
                    return Err(DiagramError::Invalid(
                        "mxCell elements must be siblings, never nested".to_string(),
                    ));
                }
            }
            Event::End(_) => {
                if depth == 2 {
                    if let Some((start, element)) = open_cell.take() {
                        let end = reader.buffer_position() as usize;
                        cells.push(span_from(&element, &wrapped[start..end]));
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Empty(element) => {
                if depth == 1 {
                    if element.name().as_ref() != b"mxCell" {
                        return Err(DiagramError::Invalid(
                            "XML should contain ONLY mxCell elements at the top level".to_string(),
                        ));
                    }
                    let end = reader.buffer_position() as usize;
                    cells.push(span_from(&element, &wrapped[before..end]));
                } else if depth > 1 && element.name().as_ref() == b"mxCell" {
                    return Err(DiagramError::Invalid(
                        "mxCell elements must be siblings, never nested".to_string(),
                    ));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(parse_error("unclosed element"));
    }
    if cells.is_empty() {
        return Err(DiagramError::Invalid(
            "XML must contain at least one mxCell element".to_string(),
        ));
    }
    Ok(cells)
}

/// Ids of every mxCell in a document, at any depth.
fn all_cell_ids(xml: &str) -> Result<Vec<String>, DiagramError> {
    let mut reader = Reader::from_str(xml);
    let mut ids = Vec::new();
    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(element) | Event::Empty(element)
                if element.name().as_ref() == b"mxCell" =>
            {
                if let Some(id) = attribute(&element, b"id") {
                    ids.push(id);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

fn wrap_document(cells: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<mxfile host="app.diagrams.net" agent="archscribe">
  <diagram name="Page-1" id="diagram-1">
    <mxGraphModel dx="1422" dy="794" grid="1" gridSize="10" guides="1" tooltips="1" connect="1" arrows="1" fold="1" page="1" pageScale="1" pageWidth="827" pageHeight="1169" math="0" shadow="0">
      <root>
        <mxCell id="0"/>
        <mxCell id="1" parent="0"/>
{cells}
      </root>
    </mxGraphModel>
  </diagram>
</mxfile>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_BOXES_AND_EDGE: &str = r#"<mxCell id="2" value="API" style="rounded=1;" vertex="1" parent="1">
  <mxGeometry x="40" y="40" width="120" height="60" as="geometry"/>
</mxCell>
<mxCell id="3" value="Worker" vertex="1" parent="1">
  <mxGeometry x="240" y="40" width="120" height="60" as="geometry"/>
</mxCell>
<mxCell id="4" value="DB &amp; cache" vertex="1" parent="1">
  <mxGeometry x="440" y="40" width="120" height="60" as="geometry"/>
</mxCell>
<mxCell id="5" edge="1" parent="1" source="2" target="3">
  <mxGeometry relative="1" as="geometry"/>
</mxCell>"#;

    #[test]
    fn complete_fragments_are_detected() {
        assert!(is_fragment_complete(THREE_BOXES_AND_EDGE));
        assert!(is_fragment_complete(r#"<mxCell id="2" parent="1"/>"#));
        assert!(is_fragment_complete("  <mxCell id=\"2\" parent=\"1\"></mxCell>\n"));
    }

    #[test]
    fn truncated_fragments_are_detected() {
        assert!(!is_fragment_complete(r#"<mxCell id="2" parent="1"><mxGeometry"#));
        assert!(!is_fragment_complete(r#"<mxCell id="2" parent="1"><mxGeometry x="1"/>"#));
        assert!(!is_fragment_complete(r#"<mxCell id="2" value="cut"#));
    }

    #[test]
    fn initialize_wraps_cells_in_skeleton() {
        let doc = DiagramDocument::initialize(THREE_BOXES_AND_EDGE).expect("initialize");
        assert_eq!(doc.cell_count(), 4);
        let xml = doc.as_xml();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<mxCell id="0"/>"#));
        assert!(xml.contains(r#"<mxCell id="1" parent="0"/>"#));
        assert!(xml.contains(r#"value="DB &amp; cache""#));
        let ids = doc.cell_ids().expect("ids");
        assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5"]);
    }

    #[test]
    fn initialize_rejects_truncated_fragment() {
        let err = DiagramDocument::initialize(r#"<mxCell id="2" parent="1"><mxGeo"#)
            .expect_err("truncated");
        assert!(err.is_truncated());
    }

    #[test]
    fn initialize_rejects_wrapper_tags() {
        let err = DiagramDocument::initialize(
            r#"<mxGraphModel><root><mxCell id="2" parent="1"/></root></mxGraphModel>"#,
        )
        .expect_err("wrapper");
        assert!(matches!(err, DiagramError::Invalid(msg) if msg.contains("no wrapper tags")));
    }

    #[test]
    fn initialize_rejects_reserved_ids() {
        let err = DiagramDocument::initialize(r#"<mxCell id="1" parent="0"/>"#)
            .expect_err("reserved");
        assert!(!err.is_truncated());
        assert!(err.to_string().contains("root cells"));
    }

    #[test]
    fn initialize_rejects_missing_reference() {
        let err = DiagramDocument::initialize(
            r#"<mxCell id="2" parent="1"/><mxCell id="3" edge="1" parent="1" source="2" target="9"/>"#,
        )
        .expect_err("dangling target");
        assert!(err.to_string().contains("target \"9\""));
    }

    #[test]
    fn initialize_rejects_duplicate_and_nested_cells() {
        let dup = DiagramDocument::initialize(
            r#"<mxCell id="2" parent="1"/><mxCell id="2" parent="1"/>"#,
        )
        .expect_err("duplicate");
        assert!(dup.to_string().contains("duplicate"));

        let nested = DiagramDocument::initialize(
            r#"<mxCell id="2" parent="1"><mxCell id="3" parent="1"/></mxCell>"#,
        )
        .expect_err("nested");
        assert!(nested.to_string().contains("siblings"));
    }

    #[test]
    fn initialize_allows_forward_references_within_fragment() {
        let doc = DiagramDocument::initialize(
            r#"<mxCell id="e" edge="1" parent="1" source="a" target="b"/><mxCell id="a" parent="1"/><mxCell id="b" parent="1"/>"#,
        )
        .expect("initialize");
        assert_eq!(doc.cell_count(), 3);
        let ids = doc.cell_ids().expect("ids");
        // fragment order is preserved
        assert_eq!(ids[2], "e");
    }

    #[test]
    fn append_adds_disjoint_cells() {
        let doc = DiagramDocument::initialize(THREE_BOXES_AND_EDGE).expect("initialize");
        let outcome = doc
            .append(r#"<mxCell id="6" value="Queue" vertex="1" parent="1"/><mxCell id="7" edge="1" parent="1" source="6" target="4"/>"#)
            .expect("append");
        assert_eq!(outcome.appended, 2);
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.document.cell_count(), 6);

        let xml = outcome.document.as_xml();
        let queue = xml.find(r#"id="6""#).expect("queue present");
        assert!(queue < xml.find("</root>").expect("root close"));
        // the original document is unchanged
        assert_eq!(doc.cell_count(), 4);
    }

    #[test]
    fn append_rejects_colliding_ids_individually() {
        let doc = DiagramDocument::initialize(THREE_BOXES_AND_EDGE).expect("initialize");
        let outcome = doc
            .append(r#"<mxCell id="2" parent="1"/><mxCell id="8" parent="1"/>"#)
            .expect("partial append");
        assert_eq!(outcome.appended, 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert!(outcome.rejected[0].contains("duplicate cell id \"2\""));
        assert_eq!(outcome.document.cell_count(), 5);
    }

    #[test]
    fn append_fails_when_nothing_merges() {
        let doc = DiagramDocument::initialize(THREE_BOXES_AND_EDGE).expect("initialize");
        let err = doc
            .append(r#"<mxCell id="3" parent="1"/><mxCell id="9" parent="missing"/>"#)
            .expect_err("nothing appended");
        match err {
            DiagramError::NothingAppended { errors } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn append_to_requires_existing_document() {
        let err = append_to(None, r#"<mxCell id="2" parent="1"/>"#).expect_err("no doc");
        assert_eq!(err, DiagramError::NoExistingDiagram);
    }

    #[test]
    fn append_to_checks_truncation_before_existence() {
        let err = append_to(None, r#"<mxCell id="2" parent="1">"#).expect_err("truncated");
        assert!(err.is_truncated());
    }

    #[test]
    fn from_xml_round_trips_count() {
        let doc = DiagramDocument::initialize(THREE_BOXES_AND_EDGE).expect("initialize");
        let reloaded = DiagramDocument::from_xml(doc.as_xml().to_string()).expect("reload");
        assert_eq!(reloaded.cell_count(), 4);
    }
}
