//! Schema Registry: the structured-output contract for product extraction.
//!
//! The schema is a flat table of [`FieldSpec`]s keyed by dotted logical
//! paths (`step2.productInformation.group1.productName`). From that table the
//! registry renders the strict JSON Schema sent with every inference request,
//! in either the nested or the flat [`SchemaLayout`].
//!
//! Every rendered object sets `additionalProperties: false` and lists all of
//! its properties as `required`. The closed shape is enforced by the
//! inference service's strict mode and is not re-validated locally.

use crate::config::SchemaLayout;
use crate::error::AutofillError;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

/// The only registered schema version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Type of a single extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text of at most `max_chars` characters (spaces included).
    Text { max_chars: usize },
    Boolean,
}

/// One leaf of the extraction schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Dotted logical path, e.g. `step2.productInformation.group1.productName`.
    pub path: &'static str,
    pub kind: FieldKind,
    /// Natural-language extraction rule, sent as the field description.
    pub rule: &'static str,
}

impl FieldSpec {
    /// Last path segment (the property name inside its parent object).
    pub fn name(&self) -> &'static str {
        self.path.rsplit('.').next().unwrap_or(self.path)
    }

    /// Character limit for text fields.
    pub fn max_chars(&self) -> Option<usize> {
        match self.kind {
            FieldKind::Text { max_chars } => Some(max_chars),
            FieldKind::Boolean => None,
        }
    }

    fn description(&self) -> String {
        match self.kind {
            FieldKind::Text { max_chars } => {
                format!("{}. Max {} characters. {}", self.path, max_chars, self.rule)
            }
            FieldKind::Boolean => format!("{}. {}", self.path, self.rule),
        }
    }

    fn json_schema(&self) -> Value {
        let ty = match self.kind {
            FieldKind::Text { .. } => "string",
            FieldKind::Boolean => "boolean",
        };
        json!({ "type": ty, "description": self.description() })
    }
}

/// An immutable, versioned extraction schema.
#[derive(Debug)]
pub struct ExtractionSchema {
    pub version: &'static str,
    pub fields: &'static [FieldSpec],
}

const fn text(path: &'static str, max_chars: usize, rule: &'static str) -> FieldSpec {
    FieldSpec {
        path,
        kind: FieldKind::Text { max_chars },
        rule,
    }
}

const fn boolean(path: &'static str, rule: &'static str) -> FieldSpec {
    FieldSpec {
        path,
        kind: FieldKind::Boolean,
        rule,
    }
}

static FIELDS_V1: [FieldSpec; 13] = [
    text(
        "step2.productInformation.group1.productDescription",
        30,
        "Short product description. '' if it cannot be determined without inventing. No line breaks.",
    ),
    text(
        "step2.productInformation.group1.productName",
        20,
        "Only if visible in the image; otherwise ''.",
    ),
    text(
        "step2.productInformation.group1.productBrand",
        20,
        "Only if visible in the image; otherwise ''.",
    ),
    text(
        "step2.productInformation.group1.productUseAndApplication",
        100,
        "Brief, coherent use; '' when in doubt.",
    ),
    text(
        "step2.productInformation.detailedProductDescription.productDescriptionExtended",
        600,
        "Detailed coherent description. Do not invent technical data or certifications. No line breaks.",
    ),
    boolean(
        "step2.productInformation.generalInformation.isElectric",
        "true ONLY with visible evidence; otherwise false.",
    ),
    boolean(
        "step2.productInformation.productUses.foodContact",
        "true ONLY if clearly meant for food or drink; otherwise false.",
    ),
    boolean(
        "step2.productInformation.productMaterials.containsPaper",
        "true ONLY if paper or cardboard is visible; false when in doubt.",
    ),
    boolean(
        "step2.productInformation.productMaterials.containsGlass",
        "true ONLY if glass is visible; false when in doubt.",
    ),
    boolean(
        "step2.productInformation.productMaterials.containsMetal",
        "true ONLY if metal is visible; false when in doubt.",
    ),
    boolean(
        "step2.productInformation.productMaterials.containsTextiles",
        "true ONLY if textile is visible; false when in doubt.",
    ),
    boolean(
        "step2.productInformation.productMaterials.containsBiodegradableMaterial",
        "true ONLY with clear evidence (visible or on a label); false when in doubt.",
    ),
    text(
        "step5.productInfo.productWarning.productWarning",
        600,
        "Generic risks, prohibitions and care notes consistent with the product. Do not invent data. No line breaks.",
    ),
];

static SCHEMA_V1: ExtractionSchema = ExtractionSchema {
    version: SCHEMA_VERSION,
    fields: &FIELDS_V1,
};

static NESTED_V1: Lazy<Value> = Lazy::new(|| SCHEMA_V1.render(SchemaLayout::Nested));
static FLAT_V1: Lazy<Value> = Lazy::new(|| SCHEMA_V1.render(SchemaLayout::Flat));

/// Look up a registered schema by version.
pub fn get_schema(version: &str) -> Result<&'static ExtractionSchema, AutofillError> {
    if version == SCHEMA_VERSION {
        Ok(&SCHEMA_V1)
    } else {
        Err(AutofillError::UnsupportedSchemaVersion {
            version: version.to_string(),
        })
    }
}

impl ExtractionSchema {
    /// Look up a field by its dotted path.
    pub fn field(&self, path: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.path == path)
    }

    pub fn text_fields(&self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Text { .. }))
    }

    /// Strict JSON Schema for the given layout, rendered once per process.
    pub fn json_schema(&'static self, layout: SchemaLayout) -> &'static Value {
        debug_assert_eq!(self.version, SCHEMA_VERSION);
        match layout {
            SchemaLayout::Nested => Lazy::force(&NESTED_V1),
            SchemaLayout::Flat => Lazy::force(&FLAT_V1),
        }
    }

    /// Name attached to the schema-constrained output format.
    pub fn format_name(&self, layout: SchemaLayout) -> &'static str {
        match layout {
            SchemaLayout::Nested => "catalog_autofill_v1",
            SchemaLayout::Flat => "catalog_autofill_fields_v1",
        }
    }

    /// `productDescription<=30, productName<=20, …` for the instruction text.
    pub fn limits_summary(&self) -> String {
        self.text_fields()
            .filter_map(|f| f.max_chars().map(|n| format!("{}<={}", f.name(), n)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render(&self, layout: SchemaLayout) -> Value {
        let version = json!({ "type": "string", "enum": [self.version] });
        match layout {
            SchemaLayout::Nested => {
                let entries: Vec<(Vec<&str>, &FieldSpec)> = self
                    .fields
                    .iter()
                    .map(|f| (f.path.split('.').collect(), f))
                    .collect();
                let mut root = nested_object(&entries);
                if let Some(Value::Object(props)) = root.get_mut("properties") {
                    let mut ordered = Map::new();
                    ordered.insert("schema_version".into(), version);
                    ordered.extend(std::mem::take(props));
                    *props = ordered;
                }
                prepend_required(&mut root, "schema_version");
                root
            }
            SchemaLayout::Flat => {
                let mut properties = Map::new();
                for f in self.fields {
                    properties.insert(f.path.to_string(), f.json_schema());
                }
                let fields = closed_object(properties, self.fields.iter().map(|f| f.path));
                let mut top = Map::new();
                top.insert("schema_version".into(), version);
                top.insert("fields".into(), fields);
                closed_object(top, ["schema_version", "fields"])
            }
        }
    }
}

/// `{"type":"object","additionalProperties":false,"required":[…],"properties":{…}}`
fn closed_object<'a>(
    properties: Map<String, Value>,
    required: impl IntoIterator<Item = &'a str>,
) -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": required.into_iter().collect::<Vec<_>>(),
        "properties": properties,
    })
}

/// Build a closed object from entries whose path is relative to this level.
///
/// Sibling order follows the first appearance of each segment in the table.
fn nested_object(entries: &[(Vec<&str>, &FieldSpec)]) -> Value {
    let mut order: Vec<&str> = Vec::new();
    for (segments, _) in entries {
        if let Some(head) = segments.first() {
            if !order.contains(head) {
                order.push(*head);
            }
        }
    }

    let mut properties = Map::new();
    for key in &order {
        let children: Vec<(Vec<&str>, &FieldSpec)> = entries
            .iter()
            .filter(|(segments, _)| segments.first() == Some(key))
            .map(|(segments, f)| (segments[1..].to_vec(), *f))
            .collect();
        let value = match children.as_slice() {
            [(rest, leaf)] if rest.is_empty() => leaf.json_schema(),
            _ => nested_object(&children),
        };
        properties.insert(key.to_string(), value);
    }
    closed_object(properties, order)
}

fn prepend_required(object: &mut Value, key: &str) {
    if let Some(required) = object["required"].as_array_mut() {
        required.insert(0, Value::String(key.to_string()));
    }
}
