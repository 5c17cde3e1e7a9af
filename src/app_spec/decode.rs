//! Normalizing decode of model-produced spec JSON
//!
//! Total functions: whatever shape the model returns, the result is a
//! valid `AppSpec`. Unknown keys are ignored, known synonyms are mapped,
//! malformed entries are dropped.

use super::{AppSpec, Entity, FieldDefinition, FieldType, Layout, Navigation, View, ViewKind, Workflow};
use serde_json::Value;

const UNTITLED: &str = "Untitled App";

pub fn decode_spec(raw: &Value) -> AppSpec {
    let Some(obj) = raw.as_object() else {
        tracing::warn!("Spec payload is not an object, using minimal default");
        return AppSpec::minimal(UNTITLED);
    };

    let name = str_field(raw, &["name", "appName", "title"])
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(UNTITLED)
        .trim()
        .to_string();
    let description = str_field(raw, &["description", "summary"])
        .unwrap_or_default()
        .to_string();

    let schema = obj
        .get("entities")
        .or_else(|| obj.get("schema"))
        .or_else(|| obj.get("tables"))
        .unwrap_or(&Value::Null);
    let entities = decode_entities(schema);

    if entities.is_empty() {
        tracing::warn!(app = %name, "Spec payload had no usable entities, using minimal default");
        let mut spec = AppSpec::minimal(name);
        spec.description = description;
        return spec;
    }

    let mut views: Vec<View> = obj
        .get("views")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| decode_view(v, &entities)).collect())
        .unwrap_or_default();
    if views.is_empty() {
        views = entities
            .iter()
            .map(|e| View {
                name: format!("All {}", e.name),
                kind: ViewKind::Table,
                entity: e.name.clone(),
            })
            .collect();
    }

    let layout = obj.get("layout").map(decode_layout).unwrap_or_default();
    let workflows = obj
        .get("workflows")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(decode_workflow).collect())
        .unwrap_or_default();

    AppSpec {
        name,
        description,
        entities,
        views,
        layout,
        workflows,
    }
}

/// Decode an entity list. Accepts an array of entities or a single
/// `{fields: [...]}` object.
pub fn decode_entities(raw: &Value) -> Vec<Entity> {
    match raw {
        Value::Array(items) => items.iter().filter_map(decode_entity).collect(),
        Value::Object(obj) if obj.contains_key("fields") => {
            decode_entity(raw).into_iter().collect()
        }
        Value::Object(obj) => obj
            .get("entities")
            .map(decode_entities)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn decode_entity(raw: &Value) -> Option<Entity> {
    let name = str_field(raw, &["name", "entity", "table"])?.trim();
    if name.is_empty() {
        return None;
    }

    let mut fields: Vec<FieldDefinition> = raw
        .get("fields")
        .or_else(|| raw.get("columns"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(decode_field).collect())
        .unwrap_or_default();

    let mut seen = std::collections::HashSet::new();
    fields.retain(|f| seen.insert(f.name.clone()));

    if fields.is_empty() {
        fields.push(FieldDefinition::new("id", FieldType::Text, true));
    }

    Some(Entity {
        name: name.to_string(),
        fields,
    })
}

fn decode_field(raw: &Value) -> Option<FieldDefinition> {
    if let Some(name) = raw.as_str() {
        let name = name.trim();
        return (!name.is_empty()).then(|| FieldDefinition::new(name, FieldType::Text, false));
    }

    let name = str_field(raw, &["name", "field", "key"])?.trim();
    if name.is_empty() {
        return None;
    }
    let type_name = str_field(raw, &["type", "fieldType", "kind"]).unwrap_or("text");
    let options: Vec<String> = raw
        .get("options")
        .or_else(|| raw.get("values"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let target = str_field(raw, &["entity", "references", "ref"]).map(str::to_string);

    let field_type = normalize_type(type_name, options, target);
    let required = match raw.get("required") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    Some(FieldDefinition::new(name, field_type, required))
}

fn normalize_type(raw: &str, options: Vec<String>, target: Option<String>) -> FieldType {
    match raw.trim().to_ascii_lowercase().as_str() {
        "number" | "int" | "integer" | "float" | "decimal" | "double" | "currency" | "money" => {
            FieldType::Number
        }
        "boolean" | "bool" | "checkbox" => FieldType::Boolean,
        "date" | "datetime" | "timestamp" | "time" => FieldType::Date,
        "enum" | "select" | "choice" | "status" => FieldType::Enum { options },
        "reference" | "relation" | "ref" | "foreign_key" => match target {
            Some(entity) => FieldType::Reference { entity },
            None => FieldType::Text,
        },
        // Options without an explicit enum type still describe a choice
        _ if !options.is_empty() => FieldType::Enum { options },
        _ => FieldType::Text,
    }
}

fn decode_view(raw: &Value, entities: &[Entity]) -> Option<View> {
    let kind = match str_field(raw, &["kind", "type"])
        .unwrap_or("table")
        .to_ascii_lowercase()
        .as_str()
    {
        "table" | "list" | "grid" => ViewKind::Table,
        "form" | "create" | "edit" => ViewKind::Form,
        "detail" | "details" => ViewKind::Detail,
        "dashboard" | "stats" | "overview" => ViewKind::Dashboard,
        "kanban" | "board" => ViewKind::Kanban,
        "calendar" | "schedule" => ViewKind::Calendar,
        _ => return None,
    };

    let entity = match str_field(raw, &["entity", "source"]) {
        Some(name) => entities
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))?
            .name
            .clone(),
        None => entities.first()?.name.clone(),
    };

    let name = str_field(raw, &["name", "title"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} {}", entity, kind.label()));

    Some(View { name, kind, entity })
}

fn decode_layout(raw: &Value) -> Layout {
    let navigation = match str_field(raw, &["navigation", "nav"])
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "tabs" => Navigation::Tabs,
        "topbar" | "top" | "header" => Navigation::Topbar,
        _ => Navigation::Sidebar,
    };
    let theme = str_field(raw, &["theme"]).unwrap_or("light").to_string();
    Layout { navigation, theme }
}

fn decode_workflow(raw: &Value) -> Option<Workflow> {
    let name = str_field(raw, &["name"])?.to_string();
    let trigger = str_field(raw, &["trigger", "on"])
        .unwrap_or("manual")
        .to_string();
    let steps = raw
        .get("steps")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(Workflow {
        name,
        trigger,
        steps,
    })
}

fn str_field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| raw.get(*k).and_then(Value::as_str))
}
