//! The schema model: object types, fields, sub-fields and composite
//! indexes.
//!
//! A [`Schema`] is immutable once constructed; [`Schema::new`] validates
//! the whole definition and rejects anything the engine could not store.
//! Field polymorphism is a sum type ([`Field`]) rather than a trait
//! hierarchy; the engine dispatches per kind.

use std::collections::{BTreeMap, BTreeSet};

use strata_error::{Result, StrataError};
use strata_types::{ElementType, StorageId};

/// Policy applied to a reference when its referent is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeleteAction {
    /// Leave the reference dangling; reads return null.
    Nothing,
    /// Fail the deletion with `ReferencedObject`.
    Exception,
    /// Clear the field (or remove the collection element).
    Unreference,
    /// Delete the referring object as well.
    Delete,
}

impl DeleteAction {
    /// Stable numeric tag used by the canonical schema encoding.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Nothing => 0,
            Self::Exception => 1,
            Self::Unreference => 2,
            Self::Delete => 3,
        }
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Nothing,
            1 => Self::Exception,
            2 => Self::Unreference,
            3 => Self::Delete,
            other => {
                return Err(StrataError::corrupt(format!(
                    "invalid on-delete tag {other}"
                )))
            }
        })
    }
}

/// Constraints attached to a reference-typed field or sub-field.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReferencePolicy {
    /// What happens to the holder when the referent is deleted.
    pub on_delete: DeleteAction,
    /// Object types the field may reference; `None` means any type.
    pub allowed_types: Option<BTreeSet<StorageId>>,
}

impl ReferencePolicy {
    /// Policy allowing any referent, with the given on-delete action.
    #[must_use]
    pub fn new(on_delete: DeleteAction) -> Self {
        Self {
            on_delete,
            allowed_types: None,
        }
    }

    /// Restrict the referent types.
    #[must_use]
    pub fn restricted_to(mut self, types: impl IntoIterator<Item = StorageId>) -> Self {
        self.allowed_types = Some(types.into_iter().collect());
        self
    }

    /// Whether a referent of the given type is acceptable.
    #[must_use]
    pub fn allows(&self, type_id: StorageId) -> bool {
        self.allowed_types
            .as_ref()
            .map_or(true, |set| set.contains(&type_id))
    }
}

/// A scalar field stored under a single content key.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimpleField {
    pub name: String,
    pub storage_id: StorageId,
    pub element: ElementType,
    pub indexed: bool,
    pub reference: Option<ReferencePolicy>,
}

impl SimpleField {
    #[must_use]
    pub fn new(name: impl Into<String>, storage_id: StorageId, element: ElementType) -> Self {
        Self {
            name: name.into(),
            storage_id,
            element,
            indexed: false,
            reference: None,
        }
    }

    /// Mark the field indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Attach a reference policy; implies the element type is `Reference`.
    #[must_use]
    pub fn with_reference(mut self, policy: ReferencePolicy) -> Self {
        self.reference = Some(policy);
        self
    }

    fn validate(&self, context: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(StrataError::invalid_schema(format!(
                "{context}: field with empty name"
            )));
        }
        validate_element(&self.element, &self.reference, self.indexed, context)
    }
}

/// A 64-bit counter field: fixed-width, never indexed, adjustable
/// without reading.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CounterField {
    pub name: String,
    pub storage_id: StorageId,
}

impl CounterField {
    #[must_use]
    pub fn new(name: impl Into<String>, storage_id: StorageId) -> Self {
        Self {
            name: name.into(),
            storage_id,
        }
    }
}

/// An element or key/value slot of a complex field. Sub-fields have their
/// own storage id (it prefixes their index entries) but no user-visible
/// name of their own.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubField {
    pub storage_id: StorageId,
    pub element: ElementType,
    pub indexed: bool,
    pub reference: Option<ReferencePolicy>,
}

impl SubField {
    #[must_use]
    pub fn new(storage_id: StorageId, element: ElementType) -> Self {
        Self {
            storage_id,
            element,
            indexed: false,
            reference: None,
        }
    }

    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    #[must_use]
    pub fn with_reference(mut self, policy: ReferencePolicy) -> Self {
        self.reference = Some(policy);
        self
    }

    fn validate(&self, context: &str) -> Result<()> {
        validate_element(&self.element, &self.reference, self.indexed, context)
    }
}

fn validate_element(
    element: &ElementType,
    reference: &Option<ReferencePolicy>,
    indexed: bool,
    context: &str,
) -> Result<()> {
    if let ElementType::Enum(def) = element {
        def.validate()?;
    }
    match (element.is_reference(), reference) {
        (true, None) => Err(StrataError::invalid_schema(format!(
            "{context}: reference element without a reference policy"
        ))),
        (false, Some(_)) => Err(StrataError::invalid_schema(format!(
            "{context}: reference policy on non-reference element"
        ))),
        (true, Some(policy)) if policy.on_delete != DeleteAction::Nothing && !indexed => {
            // Reverse lookup happens through the reference index, so
            // every disposition except NOTHING requires one.
            Err(StrataError::invalid_schema(format!(
                "{context}: on-delete {:?} requires the reference to be indexed",
                policy.on_delete
            )))
        }
        _ => Ok(()),
    }
}

/// A set-valued field: one content key per element.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SetField {
    pub name: String,
    pub storage_id: StorageId,
    pub element: SubField,
}

/// A list-valued field: one content key per position.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ListField {
    pub name: String,
    pub storage_id: StorageId,
    pub element: SubField,
}

/// A map-valued field: one content key per entry.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MapField {
    pub name: String,
    pub storage_id: StorageId,
    pub key: SubField,
    pub value: SubField,
}

/// One field of an object type.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Field {
    Simple(SimpleField),
    Counter(CounterField),
    Set(SetField),
    List(ListField),
    Map(MapField),
}

impl Field {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(f) => &f.name,
            Self::Counter(f) => &f.name,
            Self::Set(f) => &f.name,
            Self::List(f) => &f.name,
            Self::Map(f) => &f.name,
        }
    }

    #[must_use]
    pub fn storage_id(&self) -> StorageId {
        match self {
            Self::Simple(f) => f.storage_id,
            Self::Counter(f) => f.storage_id,
            Self::Set(f) => f.storage_id,
            Self::List(f) => f.storage_id,
            Self::Map(f) => f.storage_id,
        }
    }

    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Simple(_) => "simple",
            Self::Counter(_) => "counter",
            Self::Set(_) => "set",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// The sub-fields of a complex field, in their canonical order
    /// (element, or key then value). Empty for simple and counter fields.
    #[must_use]
    pub fn sub_fields(&self) -> Vec<&SubField> {
        match self {
            Self::Simple(_) | Self::Counter(_) => Vec::new(),
            Self::Set(f) => vec![&f.element],
            Self::List(f) => vec![&f.element],
            Self::Map(f) => vec![&f.key, &f.value],
        }
    }

    fn validate(&self, context: &str) -> Result<()> {
        if self.name().is_empty() {
            return Err(StrataError::invalid_schema(format!(
                "{context}: field with empty name"
            )));
        }
        match self {
            Self::Simple(f) => f.validate(context),
            Self::Counter(_) => Ok(()),
            Self::Set(f) => f.element.validate(context),
            Self::List(f) => f.element.validate(context),
            Self::Map(f) => {
                f.key.validate(context)?;
                f.value.validate(context)
            }
        }
    }
}

impl From<SimpleField> for Field {
    fn from(f: SimpleField) -> Self {
        Self::Simple(f)
    }
}

impl From<CounterField> for Field {
    fn from(f: CounterField) -> Self {
        Self::Counter(f)
    }
}

impl From<SetField> for Field {
    fn from(f: SetField) -> Self {
        Self::Set(f)
    }
}

impl From<ListField> for Field {
    fn from(f: ListField) -> Self {
        Self::List(f)
    }
}

impl From<MapField> for Field {
    fn from(f: MapField) -> Self {
        Self::Map(f)
    }
}

/// An index over an ordered tuple of simple fields of one object type.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompositeIndex {
    pub name: String,
    pub storage_id: StorageId,
    /// Storage ids of the participating simple fields, in tuple order.
    pub fields: Vec<StorageId>,
}

impl CompositeIndex {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        storage_id: StorageId,
        fields: Vec<StorageId>,
    ) -> Self {
        Self {
            name: name.into(),
            storage_id,
            fields,
        }
    }
}

/// One object type: a name, a storage id, fields and composite indexes.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObjectType {
    pub name: String,
    pub storage_id: StorageId,
    pub fields: Vec<Field>,
    pub composite_indexes: Vec<CompositeIndex>,
}

impl ObjectType {
    #[must_use]
    pub fn new(name: impl Into<String>, storage_id: StorageId) -> Self {
        Self {
            name: name.into(),
            storage_id,
            fields: Vec::new(),
            composite_indexes: Vec::new(),
        }
    }

    /// Append a field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<Field>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Append a composite index.
    #[must_use]
    pub fn with_composite_index(mut self, index: CompositeIndex) -> Self {
        self.composite_indexes.push(index);
        self
    }

    /// Look up a field by storage id.
    #[must_use]
    pub fn field(&self, storage_id: StorageId) -> Option<&Field> {
        self.fields.iter().find(|f| f.storage_id() == storage_id)
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Look up a composite index by storage id.
    #[must_use]
    pub fn composite_index(&self, storage_id: StorageId) -> Option<&CompositeIndex> {
        self.composite_indexes
            .iter()
            .find(|ci| ci.storage_id == storage_id)
    }

    /// The simple field a composite index component refers to.
    pub fn composite_component(&self, field_id: StorageId) -> Result<&SimpleField> {
        match self.field(field_id) {
            Some(Field::Simple(f)) => Ok(f),
            _ => Err(StrataError::invalid_schema(format!(
                "object type \"{}\": composite index component {field_id} is not a simple field",
                self.name
            ))),
        }
    }

    fn validate(&self) -> Result<()> {
        let context = format!("object type \"{}\"", self.name);
        if self.name.is_empty() {
            return Err(StrataError::invalid_schema("object type with empty name"));
        }
        let mut names = BTreeSet::new();
        for field in &self.fields {
            field.validate(&context)?;
            if !names.insert(field.name()) {
                return Err(StrataError::invalid_schema(format!(
                    "{context}: duplicate field name \"{}\"",
                    field.name()
                )));
            }
        }
        let mut index_names = BTreeSet::new();
        for ci in &self.composite_indexes {
            if ci.name.is_empty() {
                return Err(StrataError::invalid_schema(format!(
                    "{context}: composite index with empty name"
                )));
            }
            if !index_names.insert(ci.name.as_str()) {
                return Err(StrataError::invalid_schema(format!(
                    "{context}: duplicate composite index name \"{}\"",
                    ci.name
                )));
            }
            if ci.fields.len() < 2 {
                return Err(StrataError::invalid_schema(format!(
                    "{context}: composite index \"{}\" needs at least two fields",
                    ci.name
                )));
            }
            let mut seen = BTreeSet::new();
            for &field_id in &ci.fields {
                if !seen.insert(field_id) {
                    return Err(StrataError::invalid_schema(format!(
                        "{context}: composite index \"{}\" repeats field {field_id}",
                        ci.name
                    )));
                }
                self.composite_component(field_id)?;
            }
        }
        Ok(())
    }
}

/// An immutable, validated schema version.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    version: u32,
    types: BTreeMap<StorageId, ObjectType>,
}

impl Schema {
    /// Validate a definition and freeze it.
    pub fn new(version: u32, object_types: Vec<ObjectType>) -> Result<Self> {
        if version == 0 {
            return Err(StrataError::invalid_schema(
                "schema version must be at least 1",
            ));
        }

        let mut type_names = BTreeSet::new();
        let mut storage_ids: BTreeMap<StorageId, String> = BTreeMap::new();
        let mut claim = |id: StorageId, what: String| -> Result<()> {
            if let Some(existing) = storage_ids.insert(id, what.clone()) {
                return Err(StrataError::invalid_schema(format!(
                    "storage id {id} used by both {existing} and {what}"
                )));
            }
            Ok(())
        };

        let mut types = BTreeMap::new();
        for object_type in object_types {
            object_type.validate()?;
            if !type_names.insert(object_type.name.clone()) {
                return Err(StrataError::invalid_schema(format!(
                    "duplicate object type name \"{}\"",
                    object_type.name
                )));
            }
            claim(
                object_type.storage_id,
                format!("object type \"{}\"", object_type.name),
            )?;
            for field in &object_type.fields {
                claim(
                    field.storage_id(),
                    format!("field \"{}.{}\"", object_type.name, field.name()),
                )?;
                for sub in field.sub_fields() {
                    claim(
                        sub.storage_id,
                        format!("sub-field of \"{}.{}\"", object_type.name, field.name()),
                    )?;
                }
            }
            for ci in &object_type.composite_indexes {
                claim(
                    ci.storage_id,
                    format!("composite index \"{}.{}\"", object_type.name, ci.name),
                )?;
            }
            if types
                .insert(object_type.storage_id, object_type)
                .is_some()
            {
                unreachable!("duplicate storage id already rejected");
            }
        }

        Ok(Self { version, types })
    }

    /// The schema's version number.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Look up an object type by storage id.
    #[must_use]
    pub fn object_type(&self, storage_id: StorageId) -> Option<&ObjectType> {
        self.types.get(&storage_id)
    }

    /// Look up an object type by name.
    #[must_use]
    pub fn object_type_by_name(&self, name: &str) -> Option<&ObjectType> {
        self.types.values().find(|t| t.name == name)
    }

    /// All object types, ordered by storage id.
    pub fn object_types(&self) -> impl Iterator<Item = &ObjectType> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u32) -> StorageId {
        StorageId::new(n).unwrap()
    }

    fn person() -> ObjectType {
        ObjectType::new("person", sid(100))
            .with_field(SimpleField::new("age", sid(101), ElementType::Int32).indexed())
            .with_field(SimpleField::new("name", sid(102), ElementType::String))
            .with_composite_index(CompositeIndex::new(
                "age_name",
                sid(110),
                vec![sid(101), sid(102)],
            ))
    }

    #[test]
    fn valid_schema_builds() {
        let schema = Schema::new(1, vec![person()]).unwrap();
        assert_eq!(schema.version(), 1);
        let t = schema.object_type(sid(100)).unwrap();
        assert_eq!(t.name, "person");
        assert_eq!(t.field(sid(101)).unwrap().name(), "age");
        assert!(schema.object_type_by_name("person").is_some());
    }

    #[test]
    fn version_zero_rejected() {
        assert!(Schema::new(0, vec![person()]).is_err());
    }

    #[test]
    fn duplicate_storage_id_rejected() {
        let bad = ObjectType::new("a", sid(100))
            .with_field(SimpleField::new("x", sid(100), ElementType::Bool));
        assert!(Schema::new(1, vec![bad]).is_err());

        let t1 = ObjectType::new("a", sid(1));
        let t2 = ObjectType::new("b", sid(1));
        assert!(Schema::new(1, vec![t1, t2]).is_err());
    }

    #[test]
    fn reference_policy_required() {
        let bad = ObjectType::new("a", sid(1))
            .with_field(SimpleField::new("r", sid(2), ElementType::Reference));
        assert!(Schema::new(1, vec![bad]).is_err());

        let bad = ObjectType::new("a", sid(1)).with_field(
            SimpleField::new("x", sid(2), ElementType::Int32)
                .with_reference(ReferencePolicy::new(DeleteAction::Nothing)),
        );
        assert!(Schema::new(1, vec![bad]).is_err());
    }

    #[test]
    fn non_nothing_disposition_requires_index() {
        let bad = ObjectType::new("a", sid(1)).with_field(
            SimpleField::new("r", sid(2), ElementType::Reference)
                .with_reference(ReferencePolicy::new(DeleteAction::Delete)),
        );
        assert!(Schema::new(1, vec![bad]).is_err());

        let good = ObjectType::new("a", sid(1)).with_field(
            SimpleField::new("r", sid(2), ElementType::Reference)
                .indexed()
                .with_reference(ReferencePolicy::new(DeleteAction::Delete)),
        );
        assert!(Schema::new(1, vec![good]).is_ok());
    }

    #[test]
    fn composite_index_validation() {
        // Too few fields.
        let bad = ObjectType::new("a", sid(1))
            .with_field(SimpleField::new("x", sid(2), ElementType::Int32))
            .with_composite_index(CompositeIndex::new("ci", sid(3), vec![sid(2)]));
        assert!(Schema::new(1, vec![bad]).is_err());

        // Component is not a simple field.
        let bad = ObjectType::new("a", sid(1))
            .with_field(SimpleField::new("x", sid(2), ElementType::Int32))
            .with_field(CounterField::new("c", sid(3)))
            .with_composite_index(CompositeIndex::new("ci", sid(4), vec![sid(2), sid(3)]));
        assert!(Schema::new(1, vec![bad]).is_err());
    }

    #[test]
    fn reference_policy_allows() {
        let policy = ReferencePolicy::new(DeleteAction::Nothing).restricted_to([sid(5)]);
        assert!(policy.allows(sid(5)));
        assert!(!policy.allows(sid(6)));
        assert!(ReferencePolicy::new(DeleteAction::Nothing).allows(sid(9)));
    }
}
