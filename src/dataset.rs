//! Dataset lookups and user-driven mutation.

use crate::model::{Dataset, Entity, Relation};
use anyhow::{Context, Result};
use std::path::Path;

/// Lat/lon bounding box of a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Dataset {
    /// An empty canvas that only holds user-created entities.
    pub fn empty() -> Self {
        Self {
            metadata: Some(serde_json::json!({ "source": "Empty Canvas" })),
            ..Default::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read dataset {}", path.display()))?;
        let dataset: Dataset = serde_json::from_str(&raw)
            .with_context(|| format!("parse dataset {}", path.display()))?;
        Ok(dataset)
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entity(id).is_some()
    }

    /// Find the relation joining `a` and `b`, in either direction.
    pub fn relation_between(&self, a: &str, b: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| {
            (r.source == a && r.target == b) || (r.source == b && r.target == a)
        })
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let first = self.entities.first()?;
        let init = Bounds {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lon: first.lon,
            max_lon: first.lon,
        };
        Some(self.entities.iter().fold(init, |b, e| Bounds {
            min_lat: b.min_lat.min(e.lat),
            max_lat: b.max_lat.max(e.lat),
            min_lon: b.min_lon.min(e.lon),
            max_lon: b.max_lon.max(e.lon),
        }))
    }

    /// Add a user-created entity at the given position and return its fresh id.
    pub fn add_custom_entity(&mut self, lat: f64, lon: f64) -> &Entity {
        let number = self.entities.len() + 1;
        let mut n = number;
        let mut id = format!("custom_{n}");
        while self.contains(&id) {
            n += 1;
            id = format!("custom_{n}");
        }
        log::debug!("adding custom entity {id} at {lat:.6}, {lon:.6}");
        self.entities.push(Entity {
            id,
            lat,
            lon,
            label: Some(format!("Custom {number}")),
        });
        // Just pushed, so the slice is non-empty.
        &self.entities[self.entities.len() - 1]
    }

    /// Display name of an entity: its label when present, else its id.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.entity(id)
            .and_then(|e| e.label.as_deref())
            .unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset {
            entities: vec![
                Entity {
                    id: "a".into(),
                    lat: 10.0,
                    lon: 106.0,
                    label: None,
                },
                Entity {
                    id: "b".into(),
                    lat: 10.5,
                    lon: 105.5,
                    label: Some("Bridge".into()),
                },
            ],
            relations: vec![Relation {
                source: "a".into(),
                target: "b".into(),
                weight: 120.0,
            }],
            directed: false,
            metadata: None,
        }
    }

    #[test]
    fn test_lookup_and_relation_between() {
        let ds = sample();
        assert!(ds.contains("a"));
        assert!(!ds.contains("z"));
        assert!(ds.relation_between("b", "a").is_some());
        assert!(ds.relation_between("a", "z").is_none());
        assert_eq!(ds.display_name("b"), "Bridge");
        assert_eq!(ds.display_name("a"), "a");
    }

    #[test]
    fn test_bounds() {
        let b = sample().bounds().expect("bounds of non-empty dataset");
        assert_eq!(b.min_lat, 10.0);
        assert_eq!(b.max_lat, 10.5);
        assert_eq!(b.min_lon, 105.5);
        assert_eq!(b.max_lon, 106.0);
        assert!(Dataset::empty().bounds().is_none());
    }

    #[test]
    fn test_custom_entity_ids_never_collide() {
        let mut ds = Dataset::empty();
        let first = ds.add_custom_entity(1.0, 2.0).id.clone();
        assert_eq!(first, "custom_1");
        ds.entities.push(Entity {
            id: "custom_3".into(),
            lat: 0.0,
            lon: 0.0,
            label: None,
        });
        let third = ds.add_custom_entity(3.0, 4.0).clone();
        assert_eq!(third.id, "custom_4");
        assert_eq!(third.label.as_deref(), Some("Custom 3"));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("graph.json");
        std::fs::write(&path, serde_json::to_string(&sample()).expect("serialize"))
            .expect("write dataset");
        let ds = Dataset::from_json_file(&path).expect("load dataset");
        assert_eq!(ds, sample());
        assert!(Dataset::from_json_file(&dir.path().join("missing.json")).is_err());
    }
}
