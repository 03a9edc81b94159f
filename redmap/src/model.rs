use crate::{AppError, Attributes};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Associated models attached to a parent, either loaded or waiting to be saved with it.
#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Box<Model>),
    Many(Vec<Model>),
}

impl Related {
    pub fn models(&self) -> Vec<&Model> {
        match self {
            Related::One(model) => vec![model.as_ref()],
            Related::Many(models) => models.iter().collect(),
        }
    }

    pub fn models_mut(&mut self) -> Vec<&mut Model> {
        match self {
            Related::One(model) => vec![model.as_mut()],
            Related::Many(models) => models.iter_mut().collect(),
        }
    }
}

/// In-memory state of one record.
///
/// Every attribute write that alters a value lands in the changed-set together with the value
/// the attribute held before the first such write (`None` when it was absent). The changed-set
/// is what index maintenance uses to find the entries a record is leaving.
///
/// Each constructed model carries an instance number, shared by its clones, that identifies it
/// during a cascading save before it has a primary key. Equality ignores it.
#[derive(Clone, Debug)]
pub struct Model {
    instance: u64,
    kind: String,
    primary_key: Vec<String>,
    attributes: Attributes,
    changed: BTreeMap<String, Option<Value>>,
    related: BTreeMap<String, Related>,
    detached: Attributes,
    is_new: bool,
    saving: bool,
}

impl Model {
    pub fn new(kind: impl Into<String>, primary_key: Vec<String>) -> Self {
        Model {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            kind: kind.into(),
            primary_key,
            attributes: Attributes::new(),
            changed: BTreeMap::new(),
            related: BTreeMap::new(),
            detached: Attributes::new(),
            is_new: true,
            saving: false,
        }
    }

    /// A model holding attributes just read from the store: not new, nothing changed.
    pub fn loaded(kind: impl Into<String>, primary_key: Vec<String>, attributes: Attributes) -> Self {
        let mut model = Model::new(kind, primary_key);
        model.attributes = attributes;
        model.is_new = false;
        model
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub(crate) fn set_kind(&mut self, kind: impl Into<String>) {
        self.kind = kind.into();
    }

    pub fn primary_key_names(&self) -> &[String] {
        &self.primary_key
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get_attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Present and not null.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|v| !v.is_null())
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        let current = self.attributes.get(&name);
        if current != Some(&value) || self.changed.contains_key(&name) {
            if !self.changed.contains_key(&name) {
                self.changed.insert(name.clone(), current.cloned());
            }
            self.attributes.insert(name, value);
        }
    }

    pub fn set_attributes<I, K, V>(&mut self, attrs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in attrs {
            self.set_attribute(name, value);
        }
    }

    /// Writes an attribute without recording it as changed.
    pub fn set_attribute_clean(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        let removed = self.attributes.remove(name);
        if removed.is_some() && !self.changed.contains_key(name) {
            self.changed.insert(name.to_string(), removed.clone());
        }
        removed
    }

    /// The named attributes that are present and not null.
    pub fn get_attributes<'a, I>(&self, names: I) -> Attributes
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .filter_map(|name| self.attributes.get(name).filter(|v| !v.is_null()).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    pub fn primary_key(&self) -> Attributes {
        self.get_attributes(self.primary_key.iter())
    }

    pub fn has_primary_key(&self) -> bool {
        self.primary_key.iter().all(|name| self.has_attribute(name))
    }

    /// The primary key as a single value: the attribute itself for one-column keys,
    /// an object of all key attributes otherwise.
    pub fn primary_key_value(&self) -> Result<Value, AppError> {
        if !self.has_primary_key() {
            return Err(AppError::InvalidModelEncoding(format!("{} has no primary key {:?} yet", self.kind, self.primary_key)));
        }
        match self.primary_key.as_slice() {
            [single] => Ok(self.attributes[single].clone()),
            _ => Ok(Value::Object(self.primary_key().into_iter().collect::<Map<String, Value>>())),
        }
    }

    /// Primary key attributes as they were before any pending change.
    pub fn prior_primary_key(&self) -> Attributes {
        self.primary_key
            .iter()
            .filter_map(|name| match self.changed.get(name) {
                Some(prior) => prior.clone().filter(|v| !v.is_null()).map(|v| (name.clone(), v)),
                None => self.attributes.get(name).filter(|v| !v.is_null()).map(|v| (name.clone(), v.clone())),
            })
            .collect()
    }

    pub fn has_changed(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains_key(name)
    }

    pub fn changed(&self) -> &BTreeMap<String, Option<Value>> {
        &self.changed
    }

    /// Value before the pending change; `None` inside when the attribute did not exist.
    pub fn prior_value(&self, name: &str) -> Option<&Option<Value>> {
        self.changed.get(name)
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    pub(crate) fn set_saving(&mut self, saving: bool) {
        self.saving = saving;
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.changed.clear();
        self.is_new = false;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.is_new = true;
    }

    pub fn relate(&mut self, name: impl Into<String>, model: Model) {
        self.related.insert(name.into(), Related::One(Box::new(model)));
    }

    pub fn relate_many(&mut self, name: impl Into<String>, models: Vec<Model>) {
        self.related.insert(name.into(), Related::Many(models));
    }

    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related.get(name)
    }

    pub fn related_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.related.get_mut(name)
    }

    pub fn related_names(&self) -> Vec<String> {
        self.related.keys().cloned().collect()
    }

    pub fn take_related(&mut self, name: &str) -> Option<Related> {
        self.related.remove(name)
    }

    pub fn put_related(&mut self, name: impl Into<String>, related: Related) {
        self.related.insert(name.into(), related);
    }

    /// Moves an attribute out of the record body, keeping it for [`reattach`](Self::reattach).
    pub(crate) fn detach(&mut self, name: &str) {
        if let Some(value) = self.attributes.remove(name) {
            self.detached.insert(name.to_string(), value);
        }
    }

    pub(crate) fn reattach(&mut self) {
        let detached = std::mem::take(&mut self.detached);
        self.attributes.extend(detached);
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.primary_key == other.primary_key
            && self.attributes == other.attributes
            && self.changed == other.changed
            && self.related == other.related
            && self.detached == other.detached
            && self.is_new == other.is_new
            && self.saving == other.saving
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project() -> Model {
        Model::new("Project", vec!["id".to_string()])
    }

    #[test]
    fn it_should_track_prior_values() {
        let mut model = Model::loaded("Project", vec!["id".into()], crate::attrs! { "id" => "1", "name" => "A" });
        assert!(!model.has_changed());
        // 1) same value is not a change
        model.set_attribute("name", "A");
        assert!(!model.has_changed());
        // 2) first change records the prior value
        model.set_attribute("name", "B");
        assert_eq!(model.prior_value("name"), Some(&Some(json!("A"))));
        // 3) later changes keep the original prior value
        model.set_attribute("name", "C");
        assert_eq!(model.prior_value("name"), Some(&Some(json!("A"))));
        // 4) new attributes have no prior value
        model.set_attribute("status", "done");
        assert_eq!(model.prior_value("status"), Some(&None));
    }

    #[test]
    fn clean_writes_are_not_changes() {
        let mut model = project();
        model.set_attribute_clean("id", "1");
        assert!(!model.has_changed());
        assert!(model.has_primary_key());
    }

    #[test]
    fn primary_key_value_for_single_and_composite_keys() {
        let mut model = project();
        assert!(model.primary_key_value().is_err());
        model.set_attribute("id", "p1");
        assert_eq!(model.primary_key_value().unwrap(), json!("p1"));

        let mut membership = Model::new("Membership", vec!["user_id".into(), "group_id".into()]);
        membership.set_attributes([("user_id", json!("u")), ("group_id", json!(7))]);
        assert_eq!(membership.primary_key_value().unwrap(), json!({"group_id": 7, "user_id": "u"}));
    }

    #[test]
    fn prior_primary_key_uses_changed_values() {
        let mut model = Model::loaded("Project", vec!["id".into()], crate::attrs! { "id" => "old" });
        model.set_attribute("id", "new");
        assert_eq!(model.prior_primary_key(), crate::attrs! { "id" => "old" });
        assert_eq!(model.primary_key(), crate::attrs! { "id" => "new" });
    }

    #[test]
    fn persisting_clears_changes() {
        let mut model = project();
        model.set_attribute("id", "1");
        assert!(model.is_new());
        model.mark_persisted();
        assert!(!model.has_changed());
        assert!(!model.is_new());
    }

    #[test]
    fn detached_attributes_come_back() {
        let mut model = project();
        model.set_attribute("body", "long text");
        model.detach("body");
        assert!(model.get_attribute("body").is_none());
        model.reattach();
        assert_eq!(model.get_attribute("body"), Some(&json!("long text")));
    }

    #[test]
    fn related_models_are_cached_by_name() {
        let mut model = project();
        model.relate("owner", Model::new("User", vec!["id".into()]));
        model.relate_many("roles", vec![Model::new("Role", vec!["id".into()]); 2]);
        assert_eq!(model.related("owner").map(|r| r.models().len()), Some(1));
        assert_eq!(model.related("roles").map(|r| r.models().len()), Some(2));
        assert_eq!(model.related_names(), vec!["owner".to_string(), "roles".to_string()]);
        assert!(model.take_related("owner").is_some());
        assert!(model.related("owner").is_none());
    }
}
