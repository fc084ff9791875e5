//! XSD validation for tag-hierarchy documents.
//!
//! Supports the part of XML Schema that tag-hierarchy schemas use:
//!
//! - global, local and `ref` element declarations
//! - named and anonymous `complexType`s, `simpleContent` extensions
//! - `sequence`, `choice`, `all` and `any` with `minOccurs`/`maxOccurs`
//! - attributes (`use="required"`), `anyAttribute`, `mixed` content
//! - built-in simple types (string family, boolean, integer family,
//!   decimal, dateTime) and `restriction`/`enumeration`
//!
//! Anything else in a schema is reported as a [`Error::SchemaViolation`]
//! rather than silently ignored.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::parse_comment_date;
use crate::xml::{self, local, XmlElement};

/// Schema used when the caller does not supply one.
pub const DEFAULT_SCHEMA_URL: &str = "http://visual.cs.utsa.edu/ctagger/xml/HedSchema.xsd";

fn violation(msg: impl Into<String>) -> Error {
    Error::SchemaViolation(msg.into())
}

fn invalid_schema(msg: impl std::fmt::Display) -> Error {
    Error::SchemaViolation(format!("invalid schema: {}", msg))
}

// =============================================================================
// SCHEMA COMPONENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    String,
    Boolean,
    Integer,
    NonNegativeInteger,
    PositiveInteger,
    Decimal,
    DateTime,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "string" | "normalizedString" | "token" | "anyURI" | "ID" | "IDREF" | "NMTOKEN"
            | "Name" | "NCName" | "language" | "anySimpleType" => Builtin::String,
            "boolean" => Builtin::Boolean,
            "integer" | "int" | "long" | "short" | "byte" => Builtin::Integer,
            "nonNegativeInteger" | "unsignedInt" | "unsignedLong" | "unsignedShort"
            | "unsignedByte" => Builtin::NonNegativeInteger,
            "positiveInteger" => Builtin::PositiveInteger,
            "decimal" | "double" | "float" => Builtin::Decimal,
            "dateTime" | "date" => Builtin::DateTime,
            _ => return None,
        };
        Some(builtin)
    }

    fn accepts(self, value: &str) -> bool {
        let value = value.trim();
        match self {
            Builtin::String => true,
            Builtin::Boolean => matches!(value, "true" | "false" | "1" | "0"),
            Builtin::Integer => value.parse::<i64>().is_ok(),
            Builtin::NonNegativeInteger => value.parse::<u64>().is_ok(),
            Builtin::PositiveInteger => value.parse::<u64>().map_or(false, |v| v > 0),
            Builtin::Decimal => value.parse::<f64>().is_ok(),
            Builtin::DateTime => parse_comment_date(value).is_ok(),
        }
    }
}

/// A simple type: a base type name (built-in or named) plus optional enumeration.
#[derive(Debug, Clone)]
struct SimpleType {
    base: String,
    enumeration: Vec<String>,
}

impl SimpleType {
    fn named(name: &str) -> Self {
        Self {
            base: local(name).to_string(),
            enumeration: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    required: bool,
    ty: Option<SimpleType>,
}

#[derive(Debug, Clone, Default)]
struct ComplexType {
    content: Option<Particle>,
    attributes: Vec<AttributeDecl>,
    any_attribute: bool,
    mixed: bool,
    /// Text type for `simpleContent`.
    text: Option<SimpleType>,
}

#[derive(Debug, Clone)]
enum ElementType {
    Any,
    Named(String),
    Simple(SimpleType),
    Complex(Box<ComplexType>),
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    ty: ElementType,
}

#[derive(Debug, Clone, Copy)]
struct Occurs {
    min: u32,
    /// `None` is unbounded.
    max: Option<u32>,
}

#[derive(Debug, Clone)]
enum Term {
    Element(ElementDecl),
    Ref(String),
    Wildcard,
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
}

#[derive(Debug, Clone)]
struct Particle {
    term: Term,
    occurs: Occurs,
}

enum Resolved<'s> {
    Decl(&'s ElementDecl),
    Wildcard,
}

// =============================================================================
// SCHEMA PARSING
// =============================================================================

/// A compiled XSD schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    elements: HashMap<String, ElementDecl>,
    complex_types: HashMap<String, ComplexType>,
    simple_types: HashMap<String, SimpleType>,
}

fn required_attr<'a>(el: &'a XmlElement, name: &str) -> Result<&'a str> {
    el.attribute(name).ok_or_else(|| {
        invalid_schema(format!("<{}> is missing the '{}' attribute", el.name, name))
    })
}

fn is_ignorable(el: &XmlElement) -> bool {
    el.local_name() == "annotation"
}

fn parse_occurs(el: &XmlElement) -> Result<Occurs> {
    let min = match el.attribute("minOccurs") {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid_schema(format!("bad minOccurs '{}'", raw)))?,
        None => 1,
    };
    let max = match el.attribute("maxOccurs").map(str::trim) {
        Some("unbounded") => None,
        Some(raw) => Some(
            raw.parse::<u32>()
                .map_err(|_| invalid_schema(format!("bad maxOccurs '{}'", raw)))?,
        ),
        None => Some(1),
    };
    if max.is_some_and(|m| m < min) {
        return Err(invalid_schema(format!(
            "maxOccurs below minOccurs on <{}>",
            el.name
        )));
    }
    Ok(Occurs { min, max })
}

impl Schema {
    /// Compile an XSD document.
    pub fn parse(xsd: &str) -> Result<Self> {
        let root = xml::parse_element(xsd).map_err(invalid_schema)?;
        if root.local_name() != "schema" {
            return Err(invalid_schema(format!(
                "root element is <{}>, expected <schema>",
                root.name
            )));
        }

        let mut schema = Schema::default();
        for child in &root.children {
            match child.local_name() {
                "element" => {
                    let decl = Self::parse_element_decl(child)?;
                    schema.elements.insert(decl.name.clone(), decl);
                }
                "complexType" => {
                    let name = required_attr(child, "name")?.to_string();
                    schema
                        .complex_types
                        .insert(name, Self::parse_complex_type(child)?);
                }
                "simpleType" => {
                    let name = required_attr(child, "name")?.to_string();
                    schema
                        .simple_types
                        .insert(name, Self::parse_simple_type(child)?);
                }
                "annotation" | "import" | "include" => {}
                other => {
                    return Err(invalid_schema(format!(
                        "unsupported top-level construct <{}>",
                        other
                    )))
                }
            }
        }
        debug!(
            subsystem = "schema",
            op = "parse",
            result_count = schema.elements.len(),
            "Compiled schema"
        );
        Ok(schema)
    }

    fn parse_element_decl(el: &XmlElement) -> Result<ElementDecl> {
        let name = required_attr(el, "name")?.to_string();
        let inline = el.children.iter().find(|c| !is_ignorable(c));
        let ty = match (el.attribute("type"), inline) {
            (Some(ty), _) if local(ty) == "anyType" => ElementType::Any,
            (Some(ty), _) => ElementType::Named(ty.to_string()),
            (None, Some(def)) if def.local_name() == "complexType" => {
                ElementType::Complex(Box::new(Self::parse_complex_type(def)?))
            }
            (None, Some(def)) if def.local_name() == "simpleType" => {
                ElementType::Simple(Self::parse_simple_type(def)?)
            }
            (None, Some(def)) => {
                return Err(invalid_schema(format!(
                    "unsupported element content <{}>",
                    def.name
                )))
            }
            (None, None) => ElementType::Any,
        };
        Ok(ElementDecl { name, ty })
    }

    fn parse_simple_type(el: &XmlElement) -> Result<SimpleType> {
        let restriction = el
            .child("restriction")
            .ok_or_else(|| invalid_schema("simpleType without restriction"))?;
        let base = local(required_attr(restriction, "base")?).to_string();
        let enumeration = restriction
            .children_named("enumeration")
            .map(|e| required_attr(e, "value").map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        Ok(SimpleType { base, enumeration })
    }

    fn parse_attribute(el: &XmlElement) -> Result<AttributeDecl> {
        let name = match (el.attribute("name"), el.attribute("ref")) {
            (Some(name), _) => name.to_string(),
            (None, Some(r)) => local(r).to_string(),
            (None, None) => return Err(invalid_schema("attribute without name or ref")),
        };
        let ty = match (el.attribute("type"), el.child("simpleType")) {
            (Some(ty), _) => Some(SimpleType::named(ty)),
            (None, Some(def)) => Some(Self::parse_simple_type(def)?),
            (None, None) => None,
        };
        Ok(AttributeDecl {
            name,
            required: el.attribute("use") == Some("required"),
            ty,
        })
    }

    fn parse_complex_type(el: &XmlElement) -> Result<ComplexType> {
        let mut ct = ComplexType {
            mixed: el.attribute("mixed") == Some("true"),
            ..Default::default()
        };
        for child in el.children.iter().filter(|c| !is_ignorable(c)) {
            match child.local_name() {
                "sequence" | "choice" | "all" => {
                    ct.content = Some(Self::parse_particle(child)?);
                }
                "attribute" => ct.attributes.push(Self::parse_attribute(child)?),
                "anyAttribute" => ct.any_attribute = true,
                "simpleContent" => {
                    let ext = child
                        .children
                        .iter()
                        .find(|c| matches!(c.local_name(), "extension" | "restriction"))
                        .ok_or_else(|| invalid_schema("simpleContent without extension"))?;
                    ct.text = Some(SimpleType::named(required_attr(ext, "base")?));
                    for attr in ext.children.iter().filter(|c| !is_ignorable(c)) {
                        match attr.local_name() {
                            "attribute" => ct.attributes.push(Self::parse_attribute(attr)?),
                            "anyAttribute" => ct.any_attribute = true,
                            other => {
                                return Err(invalid_schema(format!(
                                    "unsupported construct <{}> in simpleContent",
                                    other
                                )))
                            }
                        }
                    }
                }
                other => {
                    return Err(invalid_schema(format!(
                        "unsupported construct <{}> in complexType",
                        other
                    )))
                }
            }
        }
        Ok(ct)
    }

    fn parse_particle(el: &XmlElement) -> Result<Particle> {
        let occurs = parse_occurs(el)?;
        let term = match el.local_name() {
            "element" => match el.attribute("ref") {
                Some(r) => Term::Ref(local(r).to_string()),
                None => Term::Element(Self::parse_element_decl(el)?),
            },
            "any" => Term::Wildcard,
            group @ ("sequence" | "choice" | "all") => {
                let items = el
                    .children
                    .iter()
                    .filter(|c| !is_ignorable(c))
                    .map(Self::parse_particle)
                    .collect::<Result<Vec<_>>>()?;
                match group {
                    "sequence" => Term::Sequence(items),
                    "choice" => Term::Choice(items),
                    _ => Term::All(items),
                }
            }
            other => {
                return Err(invalid_schema(format!(
                    "unsupported particle <{}>",
                    other
                )))
            }
        };
        Ok(Particle { term, occurs })
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Validate a document against this schema.
    pub fn validate(&self, document: &str) -> Result<()> {
        let doc = xml::parse_element(document)
            .map_err(|e| violation(format!("document is not well-formed: {}", e)))?;
        let decl = self.elements.get(doc.local_name()).ok_or_else(|| {
            violation(format!(
                "no global declaration for root element <{}>",
                doc.name
            ))
        })?;
        self.check_element(&doc, decl, &format!("/{}", doc.local_name()))
    }

    fn check_element(&self, el: &XmlElement, decl: &ElementDecl, path: &str) -> Result<()> {
        match &decl.ty {
            ElementType::Any => Ok(()),
            ElementType::Simple(st) => self.check_simple_element(el, st, path),
            ElementType::Complex(ct) => self.check_complex(el, ct, path),
            ElementType::Named(name) => {
                let name = local(name);
                if name == "anyType" {
                    return Ok(());
                }
                match self.complex_types.get(name) {
                    Some(ct) => self.check_complex(el, ct, path),
                    None => self.check_simple_element(el, &SimpleType::named(name), path),
                }
            }
        }
    }

    fn check_value(&self, st: &SimpleType, value: &str, path: &str) -> Result<()> {
        let mut current = st;
        // restriction chains are short; the bound guards against cycles
        for _ in 0..32 {
            if !current.enumeration.is_empty() && !current.enumeration.iter().any(|v| v == value.trim()) {
                return Err(violation(format!(
                    "value '{}' at {} is not one of [{}]",
                    value,
                    path,
                    current.enumeration.join(", ")
                )));
            }
            if let Some(builtin) = Builtin::from_name(&current.base) {
                if !builtin.accepts(value) {
                    return Err(violation(format!(
                        "value '{}' at {} is not a valid {}",
                        value, path, current.base
                    )));
                }
                return Ok(());
            }
            current = self.simple_types.get(&current.base).ok_or_else(|| {
                violation(format!("unknown type '{}' used at {}", current.base, path))
            })?;
        }
        Err(invalid_schema(format!(
            "type restriction chain too deep at {}",
            path
        )))
    }

    fn check_simple_element(&self, el: &XmlElement, st: &SimpleType, path: &str) -> Result<()> {
        if let Some(child) = el.children.first() {
            return Err(violation(format!(
                "element <{}> not allowed inside simple-typed {}",
                child.name, path
            )));
        }
        if let Some((name, _)) = el.attributes.iter().find(|(k, _)| !is_namespace_attr(k)) {
            return Err(violation(format!(
                "attribute '{}' not allowed on {}",
                name, path
            )));
        }
        self.check_value(st, &el.text, path)
    }

    fn check_complex(&self, el: &XmlElement, ct: &ComplexType, path: &str) -> Result<()> {
        self.check_attributes(el, ct, path)?;

        if let Some(text_type) = &ct.text {
            if let Some(child) = el.children.first() {
                return Err(violation(format!(
                    "element <{}> not allowed inside text-only {}",
                    child.name, path
                )));
            }
            return self.check_value(text_type, &el.text, path);
        }
        if !ct.mixed && !el.text.trim().is_empty() {
            return Err(violation(format!("text content not allowed in {}", path)));
        }

        let kids: Vec<&XmlElement> = el.children.iter().collect();
        let Some(model) = &ct.content else {
            return match kids.first() {
                Some(child) => Err(violation(format!(
                    "unexpected element <{}> in {}",
                    child.name, path
                ))),
                None => Ok(()),
            };
        };

        let mut resolved = Vec::with_capacity(kids.len());
        for kid in &kids {
            let found = self.resolve(model, kid.local_name()).ok_or_else(|| {
                violation(format!("unexpected element <{}> in {}", kid.name, path))
            })?;
            resolved.push(found);
        }

        let ends = self.match_particle(model, &kids, &BTreeSet::from([0]));
        if !ends.contains(&kids.len()) {
            if let Some(missing) = required_names(model)
                .into_iter()
                .find(|name| !kids.iter().any(|k| k.local_name() == *name))
            {
                return Err(violation(format!(
                    "missing required element '{}' in {}",
                    missing, path
                )));
            }
            let names: Vec<&str> = kids.iter().map(|k| k.local_name()).collect();
            return Err(violation(format!(
                "content of {} does not match its declaration (found: {})",
                path,
                names.join(", ")
            )));
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (kid, found) in kids.iter().zip(resolved) {
            let position = seen.entry(kid.local_name()).or_insert(0);
            *position += 1;
            if let Resolved::Decl(decl) = found {
                let child_path = format!("{}/{}[{}]", path, kid.local_name(), position);
                self.check_element(kid, decl, &child_path)?;
            }
        }
        Ok(())
    }

    fn check_attributes(&self, el: &XmlElement, ct: &ComplexType, path: &str) -> Result<()> {
        for (name, value) in &el.attributes {
            if is_namespace_attr(name) {
                continue;
            }
            match ct.attributes.iter().find(|a| a.name == *name) {
                Some(decl) => {
                    if let Some(ty) = &decl.ty {
                        self.check_value(ty, value, &format!("{}/@{}", path, name))?;
                    }
                }
                None if ct.any_attribute => {}
                None => {
                    return Err(violation(format!(
                        "undeclared attribute '{}' on {}",
                        name, path
                    )))
                }
            }
        }
        for decl in ct.attributes.iter().filter(|a| a.required) {
            if el.attribute(&decl.name).is_none() {
                return Err(violation(format!(
                    "missing required attribute '{}' on {}",
                    decl.name, path
                )));
            }
        }
        Ok(())
    }

    /// The declaration a child named `name` validates against.
    fn resolve<'s>(&'s self, particle: &'s Particle, name: &str) -> Option<Resolved<'s>> {
        match &particle.term {
            Term::Element(decl) if decl.name == name => Some(Resolved::Decl(decl)),
            Term::Element(_) => None,
            Term::Ref(r) if r == name => self.elements.get(r).map(Resolved::Decl),
            Term::Ref(_) => None,
            Term::Wildcard => Some(Resolved::Wildcard),
            Term::Sequence(items) | Term::Choice(items) | Term::All(items) => {
                let mut wildcard = None;
                for item in items {
                    match self.resolve(item, name) {
                        Some(Resolved::Decl(decl)) => return Some(Resolved::Decl(decl)),
                        Some(Resolved::Wildcard) => wildcard = Some(Resolved::Wildcard),
                        None => {}
                    }
                }
                wildcard
            }
        }
    }

    /// Positions in `kids` reachable after matching `particle` from any of `starts`.
    fn match_particle(
        &self,
        particle: &Particle,
        kids: &[&XmlElement],
        starts: &BTreeSet<usize>,
    ) -> BTreeSet<usize> {
        let Occurs { min, max } = particle.occurs;
        let bound = min.saturating_add(kids.len() as u32 + 1);
        let rounds = max.map_or(bound, |m| m.min(bound));

        let mut reached = if min == 0 {
            starts.clone()
        } else {
            BTreeSet::new()
        };
        let mut current = starts.clone();
        for round in 1..=rounds {
            let next = self.match_term(&particle.term, kids, &current);
            if next == current {
                reached.extend(next);
                break;
            }
            if round >= min {
                reached.extend(next.iter().copied());
            }
            if next.is_empty() {
                break;
            }
            current = next;
        }
        reached
    }

    fn match_term(&self, term: &Term, kids: &[&XmlElement], starts: &BTreeSet<usize>) -> BTreeSet<usize> {
        match term {
            Term::Element(_) | Term::Ref(_) | Term::Wildcard => starts
                .iter()
                .copied()
                .filter(|&p| p < kids.len() && term_accepts(term, kids[p]))
                .map(|p| p + 1)
                .collect(),
            Term::Sequence(items) => items
                .iter()
                .fold(starts.clone(), |reached, item| {
                    self.match_particle(item, kids, &reached)
                }),
            Term::Choice(items) => items
                .iter()
                .flat_map(|item| self.match_particle(item, kids, starts))
                .collect(),
            Term::All(items) => {
                let mut out = BTreeSet::new();
                let mut used = vec![false; items.len()];
                for &start in starts {
                    match_all(items, kids, start, &mut used, &mut out);
                }
                out
            }
        }
    }
}

fn term_accepts(term: &Term, kid: &XmlElement) -> bool {
    match term {
        Term::Element(decl) => decl.name == kid.local_name(),
        Term::Ref(r) => r == kid.local_name(),
        Term::Wildcard => true,
        _ => false,
    }
}

fn match_all(
    items: &[Particle],
    kids: &[&XmlElement],
    pos: usize,
    used: &mut [bool],
    out: &mut BTreeSet<usize>,
) {
    if items
        .iter()
        .zip(used.iter())
        .all(|(item, &u)| u || item.occurs.min == 0)
    {
        out.insert(pos);
    }
    if pos >= kids.len() {
        return;
    }
    for (i, item) in items.iter().enumerate() {
        if !used[i] && item.occurs.max != Some(0) && term_accepts(&item.term, kids[pos]) {
            used[i] = true;
            match_all(items, kids, pos + 1, used, out);
            used[i] = false;
        }
    }
}

/// Element names a particle always requires at its top level.
fn required_names(particle: &Particle) -> Vec<&str> {
    if particle.occurs.min == 0 {
        return Vec::new();
    }
    match &particle.term {
        Term::Element(decl) => vec![decl.name.as_str()],
        Term::Ref(r) => vec![r.as_str()],
        Term::Sequence(items) | Term::All(items) => {
            items.iter().flat_map(required_names).collect()
        }
        Term::Choice(_) | Term::Wildcard => Vec::new(),
    }
}

fn is_namespace_attr(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:") || name.starts_with("xsi:")
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Validate `xml` against the XSD text `xsd`.
pub fn validate_with_schema(xml: &str, xsd: &str) -> Result<()> {
    Schema::parse(xsd)?.validate(xml)
}

/// Download a schema document.
pub async fn fetch_schema(url: &str) -> Result<String> {
    let response = reqwest::get(url).await?.error_for_status()?;
    Ok(response.text().await?)
}

/// Validate `xml` against the schema published at [`DEFAULT_SCHEMA_URL`].
pub async fn validate_with_default_schema(xml: &str) -> Result<()> {
    let xsd = fetch_schema(DEFAULT_SCHEMA_URL).await?;
    info!(
        subsystem = "schema",
        op = "fetch",
        url = DEFAULT_SCHEMA_URL,
        "Fetched default schema"
    );
    validate_with_schema(xml, &xsd)
}
