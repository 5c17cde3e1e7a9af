//! Deterministic template generator
//!
//! Needs no model and cannot fail: any spec that passed validation (and
//! even one that did not) renders to a usable React + TypeScript app.

use super::chunk::{Artifact, PAGE, TYPES};
use crate::app_spec::{AppSpec, Entity, FieldDefinition, FieldType, View, ViewKind};
use std::fmt::Write;

pub fn generate_fallback(spec: &AppSpec) -> Artifact {
    let mut artifact = Artifact::new();
    artifact.insert(TYPES.to_string(), render_types(spec));
    artifact.insert(PAGE.to_string(), render_page(spec));
    artifact
}

fn type_name(entity: &str) -> String {
    let name = pascal(entity);
    if name.is_empty() {
        "Record".to_string()
    } else {
        name
    }
}

/// `order line` -> `OrderLine`; identifiers cannot start with a digit
fn pascal(entity: &str) -> String {
    let joined: String = entity
        .split(|c: char| !c.is_alphanumeric())
        .flat_map(|w| {
            let mut chars = w.chars();
            chars
                .next()
                .into_iter()
                .flat_map(char::to_uppercase)
                .chain(chars)
        })
        .collect();
    let trimmed = joined.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut chars = trimmed.chars();
    chars
        .next()
        .map_or_else(String::new, |first| first.to_uppercase().chain(chars).collect())
}

fn ident(field: &str) -> String {
    let cleaned: String = field
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    match cleaned.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{cleaned}"),
        Some(_) => cleaned,
        None => "_field".to_string(),
    }
}

fn render_types(spec: &AppSpec) -> String {
    let mut out = String::from("// Data types\n");
    for entity in &spec.entities {
        let _ = writeln!(out, "\nexport interface {} {{", type_name(&entity.name));
        let _ = writeln!(out, "  id: string;");
        for field in entity.fields.iter().filter(|f| f.name != "id") {
            let optional = if field.required { "" } else { "?" };
            let ts = match &field.field_type {
                FieldType::Reference { entity } => format!("string /* {} id */", type_name(entity)),
                other => other.ts_type(),
            };
            let _ = writeln!(out, "  {}{optional}: {ts};", ident(&field.name));
        }
        out.push_str("}\n");
    }
    out
}

fn default_value(field: &FieldDefinition) -> String {
    match &field.field_type {
        FieldType::Number => "0".to_string(),
        FieldType::Boolean => "false".to_string(),
        FieldType::Enum { options } => options
            .first()
            .map_or_else(|| "\"\"".to_string(), |o| format!("\"{o}\"")),
        FieldType::Text | FieldType::Date | FieldType::Reference { .. } => "\"\"".to_string(),
    }
}

fn input_for(field: &FieldDefinition, draft: &str, setter: &str) -> String {
    let name = ident(&field.name);
    match &field.field_type {
        FieldType::Enum { options } => {
            let opts: String = options
                .iter()
                .map(|o| format!("<option value=\"{o}\">{o}</option>"))
                .collect();
            format!(
                "<select value={{{draft}.{name} ?? \"\"}} onChange={{(e) => {setter}({{ ...{draft}, {name}: e.target.value }})}}>{opts}</select>"
            )
        }
        FieldType::Boolean => format!(
            "<input type=\"checkbox\" checked={{!!{draft}.{name}}} onChange={{(e) => {setter}({{ ...{draft}, {name}: e.target.checked }})}} />"
        ),
        FieldType::Number => format!(
            "<input type=\"number\" value={{{draft}.{name} ?? 0}} onChange={{(e) => {setter}({{ ...{draft}, {name}: Number(e.target.value) }})}} />"
        ),
        FieldType::Date => format!(
            "<input type=\"date\" value={{{draft}.{name} ?? \"\"}} onChange={{(e) => {setter}({{ ...{draft}, {name}: e.target.value }})}} />"
        ),
        FieldType::Text | FieldType::Reference { .. } => format!(
            "<input value={{{draft}.{name} ?? \"\"}} onChange={{(e) => {setter}({{ ...{draft}, {name}: e.target.value }})}} />"
        ),
    }
}

fn render_view(view: &View, entity: &Entity) -> String {
    let ty = type_name(&entity.name);
    let list = format!("{}Items", ident(&entity.name.to_lowercase()));
    let columns: Vec<&FieldDefinition> = entity.fields.iter().filter(|f| f.name != "id").collect();
    let title = &view.name;

    match view.kind {
        ViewKind::Table | ViewKind::Detail | ViewKind::Calendar => {
            let headers: String = columns
                .iter()
                .map(|f| format!("<th>{}</th>", f.name))
                .collect();
            let cells: String = columns
                .iter()
                .map(|f| format!("<td>{{String(item.{} ?? \"\")}}</td>", ident(&f.name)))
                .collect();
            format!(
                "      <section>\n        <h2>{title}</h2>\n        <table>\n          <thead><tr>{headers}</tr></thead>\n          <tbody>\n            {{{list}.map((item: {ty}) => (\n              <tr key={{item.id}}>{cells}</tr>\n            ))}}\n          </tbody>\n        </table>\n      </section>\n"
            )
        }
        ViewKind::Kanban => {
            let (group, lanes) = match entity.status_field() {
                Some(FieldDefinition {
                    name,
                    field_type: FieldType::Enum { options },
                    ..
                }) => (ident(name), options.clone()),
                _ => ("status".to_string(), vec!["open".to_string()]),
            };
            let label = columns.first().map_or_else(|| "id".to_string(), |f| ident(&f.name));
            let lanes_js = lanes
                .iter()
                .map(|l| format!("\"{l}\""))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "      <section>\n        <h2>{title}</h2>\n        <div className=\"board\">\n          {{[{lanes_js}].map((lane) => (\n            <div key={{lane}} className=\"lane\">\n              <h3>{{lane}}</h3>\n              {{{list}.filter((item: {ty}) => item.{group} === lane).map((item: {ty}) => (\n                <div key={{item.id}} className=\"card\">{{String(item.{label})}}</div>\n              ))}}\n            </div>\n          ))}}\n        </div>\n      </section>\n"
            )
        }
        ViewKind::Dashboard => format!(
            "      <section>\n        <h2>{title}</h2>\n        <p className=\"stat\">{{{list}.length}} total</p>\n      </section>\n"
        ),
        ViewKind::Form => {
            let setter = format!("set{ty}Draft");
            let draft = format!("{}Draft", ident(&entity.name.to_lowercase()));
            let inputs: String = columns
                .iter()
                .map(|f| {
                    format!(
                        "          <label>{}{}</label>\n",
                        f.name,
                        input_for(f, &draft, &setter)
                    )
                })
                .collect();
            format!(
                "      <section>\n        <h2>{title}</h2>\n        <form onSubmit={{(e) => {{ e.preventDefault(); add{ty}(); }}}}>\n{inputs}          <button type=\"submit\">Save</button>\n        </form>\n      </section>\n"
            )
        }
    }
}

fn render_page(spec: &AppSpec) -> String {
    let mut out = String::new();
    let names: Vec<String> = spec.entities.iter().map(|e| type_name(&e.name)).collect();
    let _ = writeln!(out, "import {{ useState }} from \"react\";");
    if !names.is_empty() {
        let _ = writeln!(out, "import type {{ {} }} from \"./types\";", names.join(", "));
    }
    let _ = writeln!(out, "\nexport default function App() {{");

    for entity in &spec.entities {
        let ty = type_name(&entity.name);
        let var = ident(&entity.name.to_lowercase());
        let defaults: Vec<String> = entity
            .fields
            .iter()
            .filter(|f| f.name != "id")
            .map(|f| format!("{}: {}", ident(&f.name), default_value(f)))
            .collect();
        let _ = writeln!(
            out,
            "  const [{var}Items, set{ty}Items] = useState<{ty}[]>([]);"
        );
        let _ = writeln!(
            out,
            "  const [{var}Draft, set{ty}Draft] = useState<Partial<{ty}>>({{ {} }});",
            defaults.join(", ")
        );
        let _ = writeln!(
            out,
            "  const add{ty} = () => set{ty}Items((items) => [...items, {{ ...{var}Draft, id: crypto.randomUUID() }} as {ty}]);"
        );
    }

    let nav_class = format!("{:?}", spec.layout.navigation).to_lowercase();
    let _ = writeln!(out, "\n  return (");
    let _ = writeln!(
        out,
        "    <div className=\"app theme-{} nav-{nav_class}\">",
        spec.layout.theme
    );
    let _ = writeln!(out, "      <header><h1>{}</h1></header>", spec.name);
    for view in &spec.views {
        if let Some(entity) = spec.entity(&view.entity) {
            out.push_str(&render_view(view, entity));
        }
    }
    let _ = writeln!(out, "    </div>\n  );\n}}");
    out
}
