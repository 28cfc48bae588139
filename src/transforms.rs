//! C7: transform repository — a directed graph of named coordinate
//! frames. Every user-supplied ("original") edge automatically gets a
//! computed inverse; `get_transform` concatenates a path of edges and
//! composes their statuses by taking the worst severity seen.

use std::collections::HashMap;
use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::GraphError;
use crate::geometry::Mat4;

/// Severity-ordered transform status. Variants are declared in increasing
/// severity so `max` (via `Ord`) gives the worse of two statuses, matching
/// the chain-composition rule in §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransformStatus {
    Ok,
    Missing,
    OutOfView,
    OutOfVolume,
    Switch1,
    Switch2,
    Switch3,
    ReqTimeout,
    Invalid,
    PathNotFound,
    Unknown,
}

impl TransformStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Missing => "MISSING",
            Self::OutOfView => "OUT_OF_VIEW",
            Self::OutOfVolume => "OUT_OF_VOLUME",
            Self::Switch1 => "SWITCH_1",
            Self::Switch2 => "SWITCH_2",
            Self::Switch3 => "SWITCH_3",
            Self::ReqTimeout => "REQ_TIMEOUT",
            Self::Invalid => "INVALID",
            Self::PathNotFound => "PATH_NOT_FOUND",
            Self::Unknown => "UNKNOWN",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "OK" => Self::Ok,
            "MISSING" => Self::Missing,
            "OUT_OF_VIEW" => Self::OutOfView,
            "OUT_OF_VOLUME" => Self::OutOfVolume,
            "SWITCH_1" => Self::Switch1,
            "SWITCH_2" => Self::Switch2,
            "SWITCH_3" => Self::Switch3,
            "REQ_TIMEOUT" => Self::ReqTimeout,
            "INVALID" => Self::Invalid,
            "PATH_NOT_FOUND" => Self::PathNotFound,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    matrix: Mat4,
    status: TransformStatus,
    persistent: bool,
    date: Option<String>,
    computation_error: Option<f64>,
    is_computed: bool,
}

/// Validate a frame name: non-empty, and must not itself read as
/// `To<Something>` (that word is reserved for the XML attribute, not a
/// frame name), per §4.7.
fn validate_name(name: &str) -> Result<(), GraphError> {
    if name.is_empty() {
        return Err(GraphError::InvalidName { name: name.to_string(), reason: "frame name must not be empty".into() });
    }
    if name.starts_with("To") && name[2..].chars().next().is_some_and(|c| c.is_uppercase()) {
        return Err(GraphError::InvalidName {
            name: name.to_string(),
            reason: "frame name must not start with 'To<Uppercase>'".into(),
        });
    }
    Ok(())
}

/// Directed graph of coordinate frames, guarded by a single recursive
/// lock in spirit (this type is `&mut self`-exclusive; wrap it in a
/// `Mutex` for the shared-caller case described in §5).
#[derive(Debug, Default)]
pub struct TransformRepository {
    edges: HashMap<String, HashMap<String, Edge>>,
}

impl TransformRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|m| m.contains_key(to))
    }

    fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edges.get(from).and_then(|m| m.get(to))
    }

    fn edge_mut(&mut self, from: &str, to: &str) -> Option<&mut Edge> {
        self.edges.get_mut(from).and_then(|m| m.get_mut(to))
    }

    /// BFS over the graph from `from`, skipping the origin frame once it
    /// has been left (no edge is allowed to lead back to `from` other
    /// than as a genuine cycle, which callers reject before insertion).
    /// Returns the sequence of frame names from `from` to `to` inclusive.
    fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }
        let mut visited = std::collections::HashSet::new();
        visited.insert(from.to_string());
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(vec![from.to_string()]);

        while let Some(path) = queue.pop_front() {
            let here = path.last().unwrap();
            let Some(neighbors) = self.edges.get(here) else { continue };
            for next in neighbors.keys() {
                if next == to {
                    let mut found = path.clone();
                    found.push(next.clone());
                    return Some(found);
                }
                if visited.insert(next.clone()) {
                    let mut extended = path.clone();
                    extended.push(next.clone());
                    queue.push_back(extended);
                }
            }
        }
        None
    }

    /// Register an original edge `from -> to` plus its computed inverse.
    /// Rejects `from == to`, a reverse-original conflict, or a
    /// cycle-creating insertion.
    pub fn set_transform(&mut self, from: &str, to: &str, matrix: Mat4, status: TransformStatus) -> Result<(), GraphError> {
        validate_name(from)?;
        validate_name(to)?;
        if from == to {
            return Err(GraphError::Invariant { from: from.into(), to: to.into(), reason: "from and to must differ".into() });
        }
        if let Some(reverse) = self.edge(to, from) {
            if !reverse.is_computed {
                return Err(GraphError::Invariant {
                    from: from.into(),
                    to: to.into(),
                    reason: "the reverse edge already exists as an original transform".into(),
                });
            }
        }
        if self.find_path(from, to).is_some() {
            return Err(GraphError::Invariant {
                from: from.into(),
                to: to.into(),
                reason: "a path already exists; this insertion would create a cycle".into(),
            });
        }

        let inverse = matrix.inverse_best_effort();
        self.edges.entry(from.to_string()).or_default().insert(
            to.to_string(),
            Edge { matrix, status, persistent: false, date: None, computation_error: None, is_computed: false },
        );
        self.edges.entry(to.to_string()).or_default().insert(
            from.to_string(),
            Edge { matrix: inverse, status, persistent: false, date: None, computation_error: None, is_computed: true },
        );
        Ok(())
    }

    /// Concatenate the path from `from` to `to`, composing statuses by
    /// taking the worst severity along the way.
    pub fn get_transform(&self, from: &str, to: &str) -> Result<(Mat4, TransformStatus), GraphError> {
        if from == to {
            return Ok((Mat4::IDENTITY, TransformStatus::Ok));
        }
        let Some(path) = self.find_path(from, to) else {
            return Err(GraphError::PathNotFound { from: from.into(), to: to.into() });
        };

        let mut matrix = Mat4::IDENTITY;
        let mut status = TransformStatus::Ok;
        for pair in path.windows(2) {
            let edge = self.edge(&pair[0], &pair[1]).expect("find_path only returns existing edges");
            matrix = edge.matrix.mul(&matrix);
            status = status.max(edge.status);
        }
        Ok((matrix, status))
    }

    fn original_edge_mut(&mut self, from: &str, to: &str) -> Result<&mut Edge, GraphError> {
        match self.edge_mut(from, to) {
            Some(edge) if !edge.is_computed => Ok(edge),
            Some(_) => Err(GraphError::Invariant { from: from.into(), to: to.into(), reason: "edge is computed, not original".into() }),
            None => Err(GraphError::PathNotFound { from: from.into(), to: to.into() }),
        }
    }

    pub fn set_transform_status(&mut self, from: &str, to: &str, status: TransformStatus) -> Result<(), GraphError> {
        self.original_edge_mut(from, to)?.status = status;
        Ok(())
    }

    pub fn set_transform_persistent(&mut self, from: &str, to: &str, persistent: bool) -> Result<(), GraphError> {
        self.original_edge_mut(from, to)?.persistent = persistent;
        Ok(())
    }

    pub fn set_transform_error(&mut self, from: &str, to: &str, error: f64) -> Result<(), GraphError> {
        self.original_edge_mut(from, to)?.computation_error = Some(error);
        Ok(())
    }

    pub fn set_transform_date(&mut self, from: &str, to: &str, date: impl Into<String>) -> Result<(), GraphError> {
        self.original_edge_mut(from, to)?.date = Some(date.into());
        Ok(())
    }

    /// Delete an original edge and its computed inverse.
    pub fn delete_transform(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        match self.edge(from, to) {
            Some(edge) if edge.is_computed => {
                return Err(GraphError::Invariant { from: from.into(), to: to.into(), reason: "only original edges can be deleted".into() });
            }
            None => return Err(GraphError::PathNotFound { from: from.into(), to: to.into() }),
            _ => {}
        }
        if let Some(m) = self.edges.get_mut(from) {
            m.remove(to);
        }
        if let Some(m) = self.edges.get_mut(to) {
            m.remove(from);
        }
        Ok(())
    }

    /// Serialize every persistent original edge, and, if `copy_all`, every
    /// non-persistent original edge too. Computed edges are never
    /// serialized; they're re-derived on load.
    pub fn write_configuration(&self, copy_all: bool) -> Result<String, GraphError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Start(BytesStart::new("CoordinateDefinitions")))
            .map_err(|e| GraphError::Config(e.to_string()))?;

        for (from, tos) in &self.edges {
            for (to, edge) in tos {
                if edge.is_computed {
                    continue;
                }
                if !edge.persistent && !copy_all {
                    continue;
                }
                let mut start = BytesStart::new("Transform");
                start.push_attribute(("From", from.as_str()));
                start.push_attribute(("To", to.as_str()));
                let matrix_str = matrix_to_attr(&edge.matrix);
                start.push_attribute(("Matrix", matrix_str.as_str()));
                start.push_attribute(("Persistent", if edge.persistent { "true" } else { "false" }));
                start.push_attribute(("Status", edge.status.as_str()));
                if let Some(err) = edge.computation_error {
                    start.push_attribute(("Error", err.to_string().as_str()));
                }
                if let Some(date) = &edge.date {
                    start.push_attribute(("Date", date.as_str()));
                }
                writer.write_event(Event::Empty(start)).map_err(|e| GraphError::Config(e.to_string()))?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("CoordinateDefinitions"))).map_err(|e| GraphError::Config(e.to_string()))?;
        let bytes = writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| GraphError::Config(e.to_string()))
    }

    /// Parse `<CoordinateDefinitions>` XML produced by
    /// [`Self::write_configuration`] (or hand-authored equivalently),
    /// replacing this repository's contents.
    ///
    /// Every `<Transform>` element is an original edge. A computed inverse
    /// is installed for `to -> from` only when the document doesn't
    /// already define that direction explicitly — so a document carrying
    /// both a transform and its true inverse round-trips both as
    /// originals, rather than one clobbering the other depending on
    /// parse order.
    pub fn read_configuration(&mut self, xml: &str) -> Result<(), GraphError> {
        self.clear();
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();
        let mut originals = Vec::new();

        loop {
            match reader.read_event_into(&mut buf).map_err(|e| GraphError::Config(e.to_string()))? {
                Event::Eof => break,
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Transform" => {
                    originals.push(Self::parse_transform_element(&e)?);
                }
                _ => {}
            }
            buf.clear();
        }

        let explicit: std::collections::HashSet<(&str, &str)> =
            originals.iter().map(|(from, to, _)| (from.as_str(), to.as_str())).collect();

        for (from, to, edge) in &originals {
            self.edges.entry(from.clone()).or_default().insert(to.clone(), edge.clone());
        }
        for (from, to, edge) in &originals {
            if explicit.contains(&(to.as_str(), from.as_str())) {
                continue;
            }
            let inverse = edge.matrix.inverse_best_effort();
            self.edges.entry(to.clone()).or_default().insert(
                from.clone(),
                Edge {
                    matrix: inverse,
                    status: edge.status,
                    persistent: edge.persistent,
                    date: edge.date.clone(),
                    computation_error: edge.computation_error,
                    is_computed: true,
                },
            );
        }
        Ok(())
    }

    fn parse_transform_element(e: &BytesStart) -> Result<(String, String, Edge), GraphError> {
        let mut from = None;
        let mut to = None;
        let mut matrix = None;
        let mut persistent = false;
        let mut status = TransformStatus::Ok;
        let mut error = None;
        let mut date = None;

        for attr in e.attributes() {
            let attr = attr.map_err(|e| GraphError::Config(e.to_string()))?;
            let value = attr.unescape_value().map_err(|e| GraphError::Config(e.to_string()))?.into_owned();
            match attr.key.as_ref() {
                b"From" => from = Some(value),
                b"To" => to = Some(value),
                b"Matrix" => matrix = Some(matrix_from_attr(&value)?),
                b"Persistent" => persistent = value == "true",
                b"Status" => status = TransformStatus::parse(&value),
                b"Error" => error = value.parse::<f64>().ok(),
                b"Date" => date = Some(value),
                _ => {}
            }
        }

        let from = from.ok_or_else(|| GraphError::Config("Transform element missing From".into()))?;
        let to = to.ok_or_else(|| GraphError::Config("Transform element missing To".into()))?;
        let matrix = matrix.ok_or_else(|| GraphError::Config("Transform element missing Matrix".into()))?;

        Ok((from, to, Edge { matrix, status, persistent, date, computation_error: error, is_computed: false }))
    }
}

fn matrix_to_attr(m: &Mat4) -> String {
    let mut parts = Vec::with_capacity(16);
    for row in &m.m {
        for v in row {
            parts.push(v.to_string());
        }
    }
    parts.join(" ")
}

fn matrix_from_attr(s: &str) -> Result<Mat4, GraphError> {
    let values: Vec<f64> = s
        .split_whitespace()
        .map(|tok| tok.parse::<f64>().map_err(|e| GraphError::Config(format!("invalid Matrix value {tok:?}: {e}"))))
        .collect::<Result<_, _>>()?;
    if values.len() != 16 {
        return Err(GraphError::Config(format!("Matrix attribute must have 16 values, got {}", values.len())));
    }
    let mut rows = [[0.0; 4]; 4];
    for (i, row) in rows.iter_mut().enumerate() {
        row.copy_from_slice(&values[i * 4..i * 4 + 4]);
    }
    Ok(Mat4::from_rows(rows))
}

impl Mat4 {
    /// Exact inverse for the affine (rigid/scale) matrices this module
    /// deals with: assumes the bottom row is `[0, 0, 0, 1]`.
    fn inverse_best_effort(&self) -> Mat4 {
        let a = &self.m;
        let mut aug = [[0.0f64; 8]; 4];
        for i in 0..4 {
            aug[i][..4].copy_from_slice(&a[i]);
            aug[i][4 + i] = 1.0;
        }
        for col in 0..4 {
            let pivot_row = (col..4).max_by(|&r1, &r2| aug[r1][col].abs().partial_cmp(&aug[r2][col].abs()).unwrap()).unwrap();
            aug.swap(col, pivot_row);
            let pivot = aug[col][col];
            if pivot.abs() < 1e-15 {
                return Mat4::IDENTITY;
            }
            for v in &mut aug[col] {
                *v /= pivot;
            }
            for row in 0..4 {
                if row == col {
                    continue;
                }
                let factor = aug[row][col];
                for k in 0..8 {
                    aug[row][k] -= factor * aug[col][k];
                }
            }
        }
        let mut out = [[0.0; 4]; 4];
        for i in 0..4 {
            out[i].copy_from_slice(&aug[i][4..8]);
        }
        Mat4::from_rows(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(x: f64, y: f64, z: f64) -> Mat4 {
        Mat4::from_rows([[1.0, 0.0, 0.0, x], [0.0, 1.0, 0.0, y], [0.0, 0.0, 1.0, z], [0.0, 0.0, 0.0, 1.0]])
    }

    #[test]
    fn set_and_get_identity_roundtrip() {
        let mut repo = TransformRepository::new();
        assert_eq!(repo.get_transform("A", "A").unwrap(), (Mat4::IDENTITY, TransformStatus::Ok));
    }

    #[test]
    fn set_transform_creates_inverse() {
        let mut repo = TransformRepository::new();
        repo.set_transform("Probe", "Reference", translate(1.0, 2.0, 3.0), TransformStatus::Ok).unwrap();
        let (fwd, _) = repo.get_transform("Probe", "Reference").unwrap();
        let (inv, _) = repo.get_transform("Reference", "Probe").unwrap();
        let round_trip = inv.mul(&fwd);
        assert!(round_trip.frobenius_distance(&Mat4::IDENTITY) < 1e-9);
    }

    #[test]
    fn set_transform_rejects_self_loop() {
        let mut repo = TransformRepository::new();
        assert!(repo.set_transform("A", "A", Mat4::IDENTITY, TransformStatus::Ok).is_err());
    }

    #[test]
    fn set_transform_rejects_cycle() {
        let mut repo = TransformRepository::new();
        repo.set_transform("A", "B", translate(1.0, 0.0, 0.0), TransformStatus::Ok).unwrap();
        repo.set_transform("B", "C", translate(0.0, 1.0, 0.0), TransformStatus::Ok).unwrap();
        assert!(repo.set_transform("C", "A", translate(0.0, 0.0, 1.0), TransformStatus::Ok).is_err());
    }

    #[test]
    fn get_transform_chains_and_composes_worst_status() {
        let mut repo = TransformRepository::new();
        repo.set_transform("A", "B", translate(1.0, 0.0, 0.0), TransformStatus::Ok).unwrap();
        repo.set_transform("B", "C", translate(0.0, 2.0, 0.0), TransformStatus::Invalid).unwrap();
        let (matrix, status) = repo.get_transform("A", "C").unwrap();
        assert_eq!(status, TransformStatus::Invalid);
        assert_eq!(matrix.apply_point([0.0, 0.0, 0.0]), [1.0, 2.0, 0.0]);
    }

    #[test]
    fn get_transform_missing_path_errors() {
        let repo = TransformRepository::new();
        assert!(matches!(repo.get_transform("A", "B"), Err(GraphError::PathNotFound { .. })));
    }

    #[test]
    fn setters_reject_computed_edges() {
        let mut repo = TransformRepository::new();
        repo.set_transform("A", "B", translate(1.0, 0.0, 0.0), TransformStatus::Ok).unwrap();
        assert!(repo.set_transform_status("B", "A", TransformStatus::Invalid).is_err());
        assert!(repo.set_transform_status("A", "B", TransformStatus::Invalid).is_ok());
    }

    #[test]
    fn xml_round_trip_with_copy_all() {
        let mut repo = TransformRepository::new();
        repo.set_transform("Probe", "Reference", translate(1.0, 2.0, 3.0), TransformStatus::Ok).unwrap();
        repo.set_transform_persistent("Probe", "Reference", true).unwrap();

        let xml = repo.write_configuration(true).unwrap();
        let mut reloaded = TransformRepository::new();
        reloaded.read_configuration(&xml).unwrap();

        let (original, _) = repo.get_transform("Probe", "Reference").unwrap();
        let (loaded, _) = reloaded.get_transform("Probe", "Reference").unwrap();
        assert!(original.frobenius_distance(&loaded) < 1e-9);
    }

    #[test]
    fn write_configuration_excludes_non_persistent_unless_copy_all() {
        let mut repo = TransformRepository::new();
        repo.set_transform("Probe", "Reference", translate(1.0, 2.0, 3.0), TransformStatus::Ok).unwrap();

        let default_only = repo.write_configuration(false).unwrap();
        assert!(!default_only.contains("Probe"));

        let all = repo.write_configuration(true).unwrap();
        assert!(all.contains(r#"From="Probe""#));
        assert!(!all.contains(r#"From="Reference" To="Probe""#));
    }

    #[test]
    fn read_configuration_keeps_both_directions_original_when_both_explicit() {
        let xml = r#"<CoordinateDefinitions>
            <Transform From="A" To="B" Matrix="1 0 0 1 0 1 0 2 0 0 1 3 0 0 0 1" Persistent="true" Status="OK"/>
            <Transform From="B" To="A" Matrix="1 0 0 -1 0 1 0 -2 0 0 1 -3 0 0 0 1" Persistent="true" Status="OK"/>
        </CoordinateDefinitions>"#;
        let mut repo = TransformRepository::new();
        repo.read_configuration(xml).unwrap();
        assert!(repo.set_transform_status("A", "B", TransformStatus::Invalid).is_ok());
        assert!(repo.set_transform_status("B", "A", TransformStatus::Invalid).is_ok());
    }

    #[test]
    fn xml_missing_matrix_is_config_error() {
        let mut repo = TransformRepository::new();
        let xml = r#"<CoordinateDefinitions><Transform From="A" To="B" Persistent="false" Status="OK"/></CoordinateDefinitions>"#;
        assert!(repo.read_configuration(xml).is_err());
    }

    #[test]
    fn frame_name_validation_rejects_empty_and_reserved() {
        let mut repo = TransformRepository::new();
        assert!(repo.set_transform("", "B", Mat4::IDENTITY, TransformStatus::Ok).is_err());
        assert!(repo.set_transform("ToReference", "B", Mat4::IDENTITY, TransformStatus::Ok).is_err());
    }
}
