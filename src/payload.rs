//! Typed delta payloads.
//!
//! Wire payloads are loose JSON. Each delta kind is parsed exactly once
//! into a strongly typed variant, so appliers never re-inspect raw
//! values. Extraction is strict: a missing or mistyped field yields a
//! [`MergeError`] naming it, never a silent default.
//!
//! | Kind            | Required                     | Optional                                   |
//! |-----------------|------------------------------|--------------------------------------------|
//! | `avatar_move`   | session_id, position         | rotation, animation, channel_id            |
//! | `entity_create` | id, name, components         | position, rotation, scale                  |
//! | `entity_update` | id                           | name, position, rotation, scale, components |
//! | `scene_update`  | *(none)*                     | channel_id, lighting, physics              |
//!
//! Positions and rotations may be objects (`{"x":..,"y":..,"z":..}`, plus
//! `w` for rotations) or numeric arrays (`[x, y, z]` / `[x, y, z, w]`).

use crate::delta::{Delta, DeltaKind};
use crate::error::MergeError;
use crate::types::{Quat, Vec3};
use serde_json::{Map, Value};

pub type FieldMap = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct AvatarMove {
    pub session_id: String,
    pub channel_id: Option<String>,
    pub position: Vec3,
    pub rotation: Option<Quat>,
    pub animation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityCreate {
    pub id: String,
    pub name: String,
    pub components: FieldMap,
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    pub id: String,
    pub name: Option<String>,
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
    pub components: Option<FieldMap>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneUpdate {
    pub channel_id: Option<String>,
    pub lighting: Option<FieldMap>,
    pub physics: Option<FieldMap>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaPayload {
    AvatarMove(AvatarMove),
    EntityCreate(EntityCreate),
    EntityUpdate(EntityUpdate),
    SceneUpdate(SceneUpdate),
}

impl DeltaPayload {
    /// Resolve the delta's kind and normalise its payload.
    pub fn parse(delta: &Delta) -> Result<Self, MergeError> {
        let kind = delta.kind()?;
        Self::parse_kind(kind, &delta.payload)
    }

    pub fn parse_kind(kind: DeltaKind, payload: &Value) -> Result<Self, MergeError> {
        let fields = Fields::new(kind, payload)?;
        Ok(match kind {
            DeltaKind::AvatarMove => DeltaPayload::AvatarMove(AvatarMove {
                session_id: fields.require_str("session_id")?,
                channel_id: fields.optional_str("channel_id")?,
                position: fields.require_vec3("position")?,
                rotation: fields.optional_quat("rotation")?,
                animation: fields.optional_str("animation")?,
            }),
            DeltaKind::EntityCreate => DeltaPayload::EntityCreate(EntityCreate {
                id: fields.require_str("id")?,
                name: fields.require_str("name")?,
                components: fields.require_map("components")?,
                position: fields.optional_vec3("position")?,
                rotation: fields.optional_quat("rotation")?,
                scale: fields.optional_vec3("scale")?,
            }),
            DeltaKind::EntityUpdate => DeltaPayload::EntityUpdate(EntityUpdate {
                id: fields.require_str("id")?,
                name: fields.optional_str("name")?,
                position: fields.optional_vec3("position")?,
                rotation: fields.optional_quat("rotation")?,
                scale: fields.optional_vec3("scale")?,
                components: fields.optional_map("components")?,
            }),
            DeltaKind::SceneUpdate => DeltaPayload::SceneUpdate(SceneUpdate {
                channel_id: fields.optional_str("channel_id")?,
                lighting: fields.optional_map("lighting")?,
                physics: fields.optional_map("physics")?,
            }),
        })
    }

    pub fn kind(&self) -> DeltaKind {
        match self {
            DeltaPayload::AvatarMove(_) => DeltaKind::AvatarMove,
            DeltaPayload::EntityCreate(_) => DeltaKind::EntityCreate,
            DeltaPayload::EntityUpdate(_) => DeltaKind::EntityUpdate,
            DeltaPayload::SceneUpdate(_) => DeltaKind::SceneUpdate,
        }
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

struct Fields<'a> {
    kind: DeltaKind,
    map: &'a FieldMap,
}

impl<'a> Fields<'a> {
    fn new(kind: DeltaKind, payload: &'a Value) -> Result<Self, MergeError> {
        let map = payload.as_object().ok_or_else(|| MergeError::InvalidField {
            kind,
            field: "payload".into(),
            expected: "an object",
        })?;
        Ok(Self { kind, map })
    }

    /// `null` is treated the same as an absent key.
    fn get(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    fn invalid(&self, field: &str, expected: &'static str) -> MergeError {
        MergeError::InvalidField {
            kind: self.kind,
            field: field.to_string(),
            expected,
        }
    }

    fn missing(&self, field: &'static str) -> MergeError {
        MergeError::MissingField {
            kind: self.kind,
            field,
        }
    }

    fn require_str(&self, field: &'static str) -> Result<String, MergeError> {
        self.optional_str(field)?.ok_or_else(|| self.missing(field))
    }

    fn optional_str(&self, field: &str) -> Result<Option<String>, MergeError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(field, "a non-empty string")),
        }
    }

    fn require_map(&self, field: &'static str) -> Result<FieldMap, MergeError> {
        self.optional_map(field)?.ok_or_else(|| self.missing(field))
    }

    fn optional_map(&self, field: &str) -> Result<Option<FieldMap>, MergeError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(_) => Err(self.invalid(field, "an object")),
        }
    }

    fn require_vec3(&self, field: &'static str) -> Result<Vec3, MergeError> {
        self.optional_vec3(field)?.ok_or_else(|| self.missing(field))
    }

    fn optional_vec3(&self, field: &str) -> Result<Option<Vec3>, MergeError> {
        let Some(value) = self.get(field) else {
            return Ok(None);
        };
        let [x, y, z] = components::<3>(value, &["x", "y", "z"], None)
            .ok_or_else(|| self.invalid(field, "an {x, y, z} object or [x, y, z] array"))?;
        Ok(Some(Vec3::new(x, y, z)))
    }

    fn optional_quat(&self, field: &str) -> Result<Option<Quat>, MergeError> {
        let Some(value) = self.get(field) else {
            return Ok(None);
        };
        let [x, y, z, w] = components::<4>(value, &["x", "y", "z", "w"], Some(1.0))
            .ok_or_else(|| {
                self.invalid(field, "an {x, y, z[, w]} object or [x, y, z[, w]] array")
            })?;
        Ok(Some(Quat::new(x, y, z, w)))
    }
}

/// Pull `N` numbers from either shape. The last component may fall
/// back to `last_default` when the client omits it.
fn components<const N: usize>(
    value: &Value,
    keys: &[&str; N],
    last_default: Option<f32>,
) -> Option<[f32; N]> {
    let mut out = [0.0f32; N];
    match value {
        Value::Object(map) => {
            for (i, key) in keys.iter().enumerate() {
                out[i] = match map.get(*key).and_then(Value::as_f64) {
                    Some(n) => n as f32,
                    None if i == N - 1 && !map.contains_key(*key) => last_default?,
                    None => return None,
                };
            }
        }
        Value::Array(items) => {
            let defaulted = last_default.is_some() && items.len() == N - 1;
            if items.len() != N && !defaulted {
                return None;
            }
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = match items.get(i) {
                    Some(item) => item.as_f64()? as f32,
                    None => last_default?,
                };
            }
        }
        _ => return None,
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(kind: DeltaKind, payload: Value) -> Result<DeltaPayload, MergeError> {
        DeltaPayload::parse_kind(kind, &payload)
    }

    #[test]
    fn avatar_move_accepts_object_and_array_positions() {
        let a = parse(
            DeltaKind::AvatarMove,
            json!({"session_id": "s1", "position": {"x": 1, "y": 2.5, "z": -3}}),
        )
        .unwrap();
        let b = parse(
            DeltaKind::AvatarMove,
            json!({"session_id": "s1", "position": [1.0, 2.5, -3.0]}),
        )
        .unwrap();
        assert_eq!(a, b);
        let DeltaPayload::AvatarMove(mv) = a else {
            panic!("wrong variant");
        };
        assert_eq!(mv.position, Vec3::new(1.0, 2.5, -3.0));
        assert_eq!(mv.rotation, None);
    }

    #[test]
    fn rotation_without_w_defaults_to_one() {
        let DeltaPayload::AvatarMove(mv) = parse(
            DeltaKind::AvatarMove,
            json!({"session_id": "s1", "position": [0, 0, 0], "rotation": {"x": 0, "y": 0.5, "z": 0}}),
        )
        .unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(mv.rotation, Some(Quat::new(0.0, 0.5, 0.0, 1.0)));
    }

    #[test]
    fn missing_position_names_the_field() {
        let err = parse(DeltaKind::AvatarMove, json!({"session_id": "s1"})).unwrap_err();
        assert_eq!(
            err,
            MergeError::MissingField {
                kind: DeltaKind::AvatarMove,
                field: "position"
            }
        );
    }

    #[test]
    fn non_numeric_coordinate_is_invalid() {
        let err = parse(
            DeltaKind::AvatarMove,
            json!({"session_id": "s1", "position": {"x": "1", "y": 0, "z": 0}}),
        )
        .unwrap_err();
        assert!(matches!(err, MergeError::InvalidField { ref field, .. } if field == "position"));
    }

    #[test]
    fn entity_create_requires_components() {
        let err = parse(DeltaKind::EntityCreate, json!({"id": "e1", "name": "box"})).unwrap_err();
        assert_eq!(
            err,
            MergeError::MissingField {
                kind: DeltaKind::EntityCreate,
                field: "components"
            }
        );
    }

    #[test]
    fn entity_update_only_needs_an_id() {
        let DeltaPayload::EntityUpdate(up) =
            parse(DeltaKind::EntityUpdate, json!({"id": "e1"})).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(up.id, "e1");
        assert!(up.components.is_none() && up.position.is_none());
    }

    #[test]
    fn scene_update_rejects_non_object_lighting() {
        let err = parse(DeltaKind::SceneUpdate, json!({"lighting": 3})).unwrap_err();
        assert!(matches!(err, MergeError::InvalidField { ref field, .. } if field == "lighting"));
    }

    #[test]
    fn non_object_payload_is_invalid() {
        let err = parse(DeltaKind::SceneUpdate, json!([1, 2])).unwrap_err();
        assert!(matches!(err, MergeError::InvalidField { ref field, .. } if field == "payload"));
    }
}
