//! ORM and schema model detection.
//!
//! A class becomes a data model when it derives from a known ORM base class
//! or carries a persistence annotation. Its fields are read from the class
//! body with per-framework patterns.

use regex::Regex;
use std::sync::LazyLock;

use super::language::Language;
use super::result::{FileStructure, ParsedClass, ParsedDataModel};
use crate::knowledge::models::ModelField;

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

struct Patterns {
    sqlalchemy_column: Regex,
    sqlalchemy_relationship: Regex,
    django_field: Regex,
    annotated_field: Regex,
    java_field: Regex,
    csharp_property: Regex,
    go_tagged_field: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            sqlalchemy_column: Regex::new(
                r"^\s*(\w+)\s*(?::\s*Mapped\[([^\]]+)\])?\s*=\s*(?:db\.)?(?:Column|mapped_column)\(\s*(?:db\.)?(\w+)?",
            )?,
            sqlalchemy_relationship: Regex::new(
                r#"^\s*(\w+)\s*(?::\s*[^=]+)?=\s*(?:db\.)?relationship\(\s*['"]?(\w+)"#,
            )?,
            django_field: Regex::new(r"^\s*(\w+)\s*=\s*models\.(\w+)\(")?,
            annotated_field: Regex::new(r"^\s*(\w+)\s*:\s*([^=#]+?)\s*(?:=.*)?$")?,
            java_field: Regex::new(
                r"^\s*(?:(?:private|protected|public)\s+)(?:final\s+)?([\w<>,?.\[\] ]+?)\s+(\w+)\s*(?:=[^;]*)?;",
            )?,
            csharp_property: Regex::new(
                r"^\s*public\s+(?:virtual\s+|required\s+)*([\w<>,?.\[\] ]+?)\s+(\w+)\s*\{\s*get;",
            )?,
            go_tagged_field: Regex::new(r#"^\s*(\w+)\s+([\w.*\[\]]+)\s+`[^`]*(?:gorm|db|bson):"#)?,
        })
    }
}

/// Python base classes that mark an ORM or schema model, with their source label.
const PYTHON_BASES: &[(&str, &str)] = &[
    ("Base", "sqlalchemy"),
    ("DeclarativeBase", "sqlalchemy"),
    ("db.Model", "sqlalchemy"),
    ("models.Model", "django"),
    ("Model", "django"),
    ("SQLModel", "sqlmodel"),
    ("BaseModel", "pydantic"),
    ("Document", "mongoengine"),
];

/// Annotations or attributes that mark a persisted entity.
const ENTITY_ANNOTATIONS: &[&str] = &["Entity", "Table", "Document", "Embeddable", "MappedSuperclass"];

/// Mark data-model classes in `structure` and record their fields.
pub fn detect_data_models(structure: &mut FileStructure, content: &str) {
    let Ok(patterns) = PATTERNS.as_ref() else {
        return;
    };
    let lines: Vec<&str> = content.lines().collect();

    let mut models = Vec::new();
    for class in structure.classes.iter_mut() {
        if class.is_data_model {
            continue;
        }
        let body = class_body(&lines, class);
        let Some(source) = model_source(structure.language, class, &body) else {
            continue;
        };
        class.is_data_model = true;
        models.push(ParsedDataModel {
            name: class.name.clone(),
            class_name: class.name.clone(),
            source: source.to_string(),
            fields: extract_fields(patterns, source, structure.language, &body),
        });
    }
    structure.data_models.extend(models);
}

fn model_source(language: Language, class: &ParsedClass, body: &[&str]) -> Option<&'static str> {
    match language {
        Language::Python => PYTHON_BASES
            .iter()
            .find(|(base, _)| class.superclasses.iter().any(|s| s == base))
            .map(|(_, source)| *source)
            .or_else(|| {
                body.iter()
                    .any(|l| l.trim_start().starts_with("__tablename__"))
                    .then_some("sqlalchemy")
            }),
        Language::Java => class
            .annotations
            .iter()
            .any(|a| ENTITY_ANNOTATIONS.contains(&a.as_str()))
            .then_some("jpa"),
        Language::CSharp => class
            .annotations
            .iter()
            .any(|a| ENTITY_ANNOTATIONS.contains(&a.as_str()))
            .then_some("efcore"),
        Language::Go => body
            .iter()
            .any(|l| l.contains("`gorm:") || l.contains(" gorm:\""))
            .then_some("gorm"),
        Language::TypeScript | Language::JavaScript => class
            .annotations
            .iter()
            .any(|a| a.starts_with("Entity"))
            .then_some("typeorm"),
        _ => None,
    }
}

fn extract_fields(p: &Patterns, source: &str, language: Language, body: &[&str]) -> Vec<ModelField> {
    let mut fields = Vec::new();
    let field = |name: &str, type_name: &str, modifier: Option<&str>| ModelField {
        name: name.to_string(),
        type_name: type_name.trim().to_string(),
        modifier: modifier.map(str::to_string),
        number: None,
    };

    for line in body {
        match (language, source) {
            (Language::Python, "django") => {
                if let Some(cap) = p.django_field.captures(line) {
                    fields.push(field(&cap[1], &cap[2], Some("column")));
                }
            }
            (Language::Python, "pydantic") | (Language::Python, "sqlmodel") => {
                if let Some(cap) = p.annotated_field.captures(line) {
                    if !cap[1].starts_with("__") && &cap[1] != "model_config" {
                        fields.push(field(&cap[1], &cap[2], None));
                    }
                }
            }
            (Language::Python, _) => {
                if let Some(cap) = p.sqlalchemy_column.captures(line) {
                    let type_name = cap
                        .get(2)
                        .or_else(|| cap.get(3))
                        .map_or("Unknown", |m| m.as_str());
                    fields.push(field(&cap[1], type_name, Some("column")));
                } else if let Some(cap) = p.sqlalchemy_relationship.captures(line) {
                    fields.push(field(&cap[1], &format!("Relationship<{}>", &cap[2]), Some("relationship")));
                }
            }
            (Language::Java, _) | (Language::TypeScript, _) | (Language::JavaScript, _) => {
                if let Some(cap) = p.java_field.captures(line) {
                    if !line.contains(" static ") {
                        fields.push(field(&cap[2], &cap[1], None));
                    }
                }
            }
            (Language::CSharp, _) => {
                if let Some(cap) = p.csharp_property.captures(line) {
                    fields.push(field(&cap[2], &cap[1], None));
                }
            }
            (Language::Go, _) => {
                if let Some(cap) = p.go_tagged_field.captures(line) {
                    fields.push(field(&cap[1], &cap[2], Some("column")));
                }
            }
            _ => {}
        }
    }

    fields
}

/// Lines directly inside a class body. Python bodies keep only the first
/// indentation level so nested classes and method bodies are skipped.
fn class_body<'a>(lines: &[&'a str], class: &ParsedClass) -> Vec<&'a str> {
    let start = class.start_line as usize;
    let end = (class.end_line as usize).min(lines.len());
    if start >= end {
        return Vec::new();
    }
    let body = &lines[start..end];

    let level = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .next();
    match level {
        Some(level) if level > 0 && !body.iter().any(|l| l.contains('{')) => body
            .iter()
            .filter(|l| l.len() - l.trim_start().len() == level)
            .copied()
            .collect(),
        _ => body.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::models::ClassKind;

    fn class(name: &str, start: u32, end: u32, supers: &[&str]) -> ParsedClass {
        let mut c = ParsedClass::new(name, ClassKind::Class, start, end);
        c.superclasses = supers.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn test_sqlalchemy_model() {
        let code = r#"class User(Base):
    __tablename__ = "users"
    id = Column(Integer, primary_key=True)
    email: Mapped[str] = mapped_column(String(120))
    orders = relationship("Order", back_populates="user")

    def display(self):
        name = Column(String)
        return self.email
"#;
        let mut s = FileStructure::new("models.py", Language::Python);
        s.classes.push(class("User", 1, 9, &["Base"]));
        detect_data_models(&mut s, code);

        assert!(s.classes[0].is_data_model);
        let model = &s.data_models[0];
        assert_eq!(model.source, "sqlalchemy");
        let fields: Vec<(&str, &str)> = model
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.type_name.as_str()))
            .collect();
        assert_eq!(
            fields,
            vec![("id", "Integer"), ("email", "str"), ("orders", "Relationship<Order>")]
        );
    }

    #[test]
    fn test_pydantic_and_plain_classes() {
        let code = "class Item(BaseModel):\n    sku: str\n    qty: int = 1\n\nclass Helper:\n    x: int\n";
        let mut s = FileStructure::new("schemas.py", Language::Python);
        s.classes.push(class("Item", 1, 3, &["BaseModel"]));
        s.classes.push(class("Helper", 5, 6, &[]));
        detect_data_models(&mut s, code);

        assert_eq!(s.data_models.len(), 1);
        assert_eq!(s.data_models[0].source, "pydantic");
        assert_eq!(s.data_models[0].fields.len(), 2);
        assert!(!s.classes[1].is_data_model);
    }

    #[test]
    fn test_jpa_entity() {
        let code = r#"@Entity
public class Order {
    @Id
    private Long id;
    private List<Item> items = new ArrayList<>();
    private static final long serialVersionUID = 1L;
}
"#;
        let mut s = FileStructure::new("Order.java", Language::Java);
        let mut order = class("Order", 1, 7, &[]);
        order.annotations.push("Entity".into());
        s.classes.push(order);
        detect_data_models(&mut s, code);

        let model = &s.data_models[0];
        assert_eq!(model.source, "jpa");
        let names: Vec<&str> = model.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "items"]);
        assert_eq!(model.fields[1].type_name, "List<Item>");
    }

    #[test]
    fn test_proto_messages_are_left_alone() {
        let mut s = FileStructure::new("a.proto", Language::Protobuf);
        s.classes.push(ParsedClass::new("Order", ClassKind::Message, 1, 3));
        detect_data_models(&mut s, "message Order {\n}\n");
        assert!(s.data_models.is_empty());
    }
}
