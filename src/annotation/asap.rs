//! ASAP XML annotations
//!
//! ```xml
//! <ASAP_Annotations>
//!   <Annotations>
//!     <Annotation Name="A1" Type="Polygon" PartOfGroup="tumor">
//!       <Coordinates>
//!         <Coordinate Order="0" X="10.5" Y="20.0" />
//!       </Coordinates>
//!     </Annotation>
//!   </Annotations>
//!   <AnnotationGroups>
//!     <Group Name="tumor" PartOfGroup="None" />
//!   </AnnotationGroups>
//! </ASAP_Annotations>
//! ```

use std::path::Path;

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::coordinate::Polygon;
use crate::error::{PatchError, PatchResult};

use super::AnnotationSet;

/// Root element name written by ASAP
pub const ROOT_ELEMENT: &str = "ASAP_Annotations";

/// Group name ASAP uses for annotations that belong to no group
const NO_GROUP: &str = "None";

/// One `<Annotation>` element while it is being read
struct PendingAnnotation {
    name: String,
    group: String,
    coordinates: Vec<(f64, f64)>,
}

/// Name of the first element in an XML document
pub fn root_element(content: &str) -> Option<String> {
    let mut reader = Reader::from_str(content);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Read a required attribute of an element
fn attribute(element: &BytesStart, key: &str) -> PatchResult<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| PatchError::Xml(e.to_string()))?;
        if attr.key.as_ref() == key.as_bytes() {
            let value = attr.unescape_value().map_err(|e| PatchError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn coordinate_value(element: &BytesStart, key: &str, annotation: &str) -> PatchResult<f64> {
    let raw = attribute(element, key)?.ok_or_else(|| {
        PatchError::AnnotationIncomplete(format!(
            "coordinate of annotation '{}' has no {} attribute",
            annotation, key
        ))
    })?;
    raw.trim().parse::<f64>().map_err(|_| {
        PatchError::Xml(format!("coordinate {}='{}' of annotation '{}' is not a number", key, raw, annotation))
    })
}

/// Parse an ASAP annotation file
pub fn parse(path: &Path) -> PatchResult<AnnotationSet> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content).map_err(|e| match e {
        PatchError::Xml(message) => PatchError::parse(path, message),
        other => other,
    })
}

/// Parse ASAP XML held in memory
pub fn parse_str(content: &str) -> PatchResult<AnnotationSet> {
    let mut reader = Reader::from_str(content);
    let mut groups: Vec<String> = Vec::new();
    let mut annotations: Vec<PendingAnnotation> = Vec::new();
    let mut current: Option<PendingAnnotation> = None;

    loop {
        let event = reader.read_event().map_err(|e| PatchError::Xml(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.name().as_ref() {
                    b"Annotation" => {
                        let name = attribute(e, "Name")?.unwrap_or_default();
                        let group = attribute(e, "PartOfGroup")?.ok_or_else(|| {
                            PatchError::AnnotationIncomplete(format!(
                                "annotation '{}' has no PartOfGroup",
                                name
                            ))
                        })?;
                        let pending = PendingAnnotation {
                            name,
                            group,
                            coordinates: Vec::new(),
                        };
                        if is_empty {
                            annotations.push(pending);
                        } else {
                            current = Some(pending);
                        }
                    }
                    b"Coordinate" => {
                        if let Some(annotation) = current.as_mut() {
                            let x = coordinate_value(e, "X", &annotation.name)?;
                            let y = coordinate_value(e, "Y", &annotation.name)?;
                            annotation.coordinates.push((x, y));
                        }
                    }
                    b"Group" => {
                        if let Some(name) = attribute(e, "Name")? {
                            if !groups.contains(&name) {
                                groups.push(name);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) if e.name().as_ref() == b"Annotation" => {
                if let Some(annotation) = current.take() {
                    annotations.push(annotation);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // Files without a group section still name the group on every annotation
    if groups.is_empty() {
        for annotation in &annotations {
            if annotation.group != NO_GROUP && !groups.contains(&annotation.group) {
                groups.push(annotation.group.clone());
            }
        }
    }

    let mut set = AnnotationSet::new();
    for group in &groups {
        set.add_class(group);
    }

    for annotation in annotations {
        if !groups.contains(&annotation.group) {
            warn!(
                "Skipping annotation '{}' of undeclared group '{}'",
                annotation.name, annotation.group
            );
            continue;
        }
        if annotation.coordinates.is_empty() {
            return Err(PatchError::AnnotationIncomplete(format!(
                "annotation '{}' has no coordinates",
                annotation.name
            )));
        }
        let polygon = Polygon::from_f64_pairs(annotation.coordinates)?;
        set.push(&annotation.group, polygon);
    }

    debug!("ASAP groups: {:?}", groups);
    Ok(set)
}
