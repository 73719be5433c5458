//! Copy-on-write drafts and structural diffing. See [`Draft`].

use std::{
    borrow::Cow,
    collections::{btree_map::Entry, BTreeMap},
    sync::Arc,
};

use commsync_core::patch::{to_pointer, Patch, Path, PathSegment};
use serde_json::{Map, Value};

/// A working view over a state snapshot, used by one mutating action.
///
/// The snapshot is never copied as a whole. Writes build an overlay that
/// holds, per touched node, either its new value or the touched members of
/// a container; only the nodes that are written (or handed out by
/// [`Draft::get_mut`]) are cloned. [`Draft::finish`] walks the overlay
/// against the snapshot, so untouched parts of a large state cost nothing.
///
/// An array whose length changes (push, insert, remove) is owned as a whole
/// from then on, so that the emitted patches never refer to an index that
/// an earlier patch in the same batch has moved.
pub struct Draft {
    base: Arc<Value>,
    root: Node,
}

/// The overlay at one node of the state tree. Children are keyed the way
/// the container addresses them, whatever form the caller's path used.
#[derive(Debug, Clone)]
enum Node {
    /// Unchanged; reads go to the snapshot.
    Base,
    /// Written, or cloned to be written in place.
    Owned(Value),
    /// Removed from its parent object.
    Removed,
    /// An object with some members touched. Absent members are unchanged.
    Object(BTreeMap<String, Node>),
    /// An array with some elements replaced in place. Its length is the
    /// snapshot's.
    Array(BTreeMap<usize, Node>),
}

static UNCHANGED: Node = Node::Base;

/// Where a path lands in the overlay.
enum Slot<'a> {
    /// An overlay node, and the snapshot's value at the same path.
    Node(&'a mut Node, Option<&'a Value>),
    /// Inside an owned value.
    Value(&'a mut Value),
}

/// Result of [`Draft::finish`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Finished {
    pub patches: Vec<Patch>,
    /// Applying these to the patched state restores the base.
    pub inverse_patches: Vec<Patch>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error("no value at {0:?}")]
    Missing(String),
    #[error("value at {0:?} is not an object or array")]
    NotAContainer(String),
    #[error("value at {0:?} is not an array")]
    NotAnArray(String),
    #[error("index {index} is out of bounds for the array at {path:?}")]
    OutOfBounds { path: String, index: usize },
    #[error("the state root cannot be removed")]
    RemoveRoot,
}

impl Draft {
    pub fn new(base: Arc<Value>) -> Self {
        Draft {
            base,
            root: Node::Base,
        }
    }

    /// The snapshot this draft started from.
    pub fn base(&self) -> &Value {
        &self.base
    }

    /// The state as modified so far. Borrowed from the snapshot until
    /// something is written.
    pub fn current(&self) -> Cow<'_, Value> {
        self.get(&[]).unwrap_or(Cow::Owned(Value::Null))
    }

    /// Read the node at `path`. Only a container with written members is
    /// assembled into a new value; anything else is borrowed.
    pub fn get(&self, path: &[PathSegment]) -> Option<Cow<'_, Value>> {
        read(&self.root, Some(&*self.base), path)
    }

    /// Read through a JSON pointer, e.g. `"/users/0/name"`.
    pub fn pointer(&self, pointer: &str) -> Option<Cow<'_, Value>> {
        if pointer.is_empty() {
            return self.get(&[]);
        }
        let path: Path = pointer
            .strip_prefix('/')?
            .split('/')
            .map(|token| PathSegment::Key(token.replace("~1", "/").replace("~0", "~")))
            .collect();
        self.get(&path)
    }

    pub fn is_modified(&self) -> bool {
        touched(&self.root)
    }

    /// Mutable access to the node at `path`, which is cloned for the
    /// purpose and counts as written as a whole.
    pub fn get_mut(&mut self, path: &[PathSegment]) -> Option<&mut Value> {
        match descend(&mut self.root, Some(&*self.base), path)? {
            Slot::Value(value) => Some(value),
            Slot::Node(node, base) => own(node, base),
        }
    }

    /// Insert or overwrite the node at `path`. For arrays, `index == len`
    /// appends.
    pub fn set(&mut self, path: &[PathSegment], value: Value) -> Result<(), DraftError> {
        let Some((last, parent)) = path.split_last() else {
            self.replace_root(value);
            return Ok(());
        };
        let (node, base) = match descend(&mut self.root, Some(&*self.base), parent)
            .ok_or_else(|| DraftError::Missing(to_pointer(parent)))?
        {
            Slot::Value(container) => return set_child(container, last, parent, value),
            Slot::Node(node, base) => (node, base),
        };
        split(node, base);
        match node {
            Node::Owned(container) => set_child(container, last, parent, value),
            Node::Object(children) => {
                children.insert(object_key(last), Node::Owned(value));
                Ok(())
            }
            Node::Array(children) => {
                let index = array_index(last, parent)?;
                let len = base.and_then(Value::as_array).map_or(0, Vec::len);
                if index < len {
                    children.insert(index, Node::Owned(value));
                    return Ok(());
                }
                // The length changes
                let container =
                    own(node, base).ok_or_else(|| DraftError::Missing(to_pointer(parent)))?;
                set_child(container, last, parent, value)
            }
            Node::Base if base.is_some() => Err(DraftError::NotAContainer(to_pointer(parent))),
            Node::Base | Node::Removed => Err(DraftError::Missing(to_pointer(parent))),
        }
    }

    /// Append to the array at `path`.
    pub fn push(&mut self, path: &[PathSegment], value: Value) -> Result<(), DraftError> {
        self.array_mut(path)?.push(value);
        Ok(())
    }

    /// Insert into an array, shifting the following elements.
    pub fn insert(&mut self, path: &[PathSegment], value: Value) -> Result<(), DraftError> {
        let Some((last, parent)) = path.split_last() else {
            return Err(DraftError::NotAnArray(String::new()));
        };
        let index = array_index(last, parent)?;
        let items = self.array_mut(parent)?;
        if index > items.len() {
            return Err(DraftError::OutOfBounds {
                path: to_pointer(parent),
                index,
            });
        }
        items.insert(index, value);
        Ok(())
    }

    /// Remove the node at `path`, returning it.
    pub fn remove(&mut self, path: &[PathSegment]) -> Result<Value, DraftError> {
        let (last, parent) = path.split_last().ok_or(DraftError::RemoveRoot)?;
        let missing = || DraftError::Missing(to_pointer(path));
        let (node, base) = match descend(&mut self.root, Some(&*self.base), parent)
            .ok_or_else(missing)?
        {
            Slot::Value(container) => return remove_child(container, last).ok_or_else(missing),
            Slot::Node(node, base) => (node, base),
        };
        split(node, base);
        match node {
            Node::Owned(container) => remove_child(container, last).ok_or_else(missing),
            Node::Object(children) => {
                let key = object_key(last);
                let child_base = base.and_then(|b| b.get(key.as_str()));
                let child = children.get(&key).unwrap_or(&UNCHANGED);
                let removed = materialize(child, child_base).ok_or_else(missing)?;
                children.insert(key, Node::Removed);
                Ok(removed)
            }
            Node::Array(_) => {
                // Later elements move; the array is the unit of change
                let container = own(node, base).ok_or_else(missing)?;
                remove_child(container, last).ok_or_else(missing)
            }
            Node::Base | Node::Removed => Err(missing()),
        }
    }

    pub fn replace_root(&mut self, value: Value) {
        self.root = Node::Owned(value);
    }

    /// Finalize the draft into the minimal patch list and its inverse.
    /// A draft that was never written, or whose writes cancel out, yields
    /// no patches.
    pub fn finish(self) -> Finished {
        let mut differ = Differ::default();
        differ.diff_node(&mut Vec::new(), &self.root, Some(&*self.base));
        differ.finish()
    }

    /// The array at `path`, owned so that its length may change.
    fn array_mut(&mut self, path: &[PathSegment]) -> Result<&mut Vec<Value>, DraftError> {
        let missing = || DraftError::Missing(to_pointer(path));
        let not_an_array = || DraftError::NotAnArray(to_pointer(path));
        let value = match descend(&mut self.root, Some(&*self.base), path).ok_or_else(missing)? {
            Slot::Value(value) => value,
            Slot::Node(node, base) => {
                if !is_array(node, base) {
                    return Err(not_an_array());
                }
                own(node, base).ok_or_else(missing)?
            }
        };
        value.as_array_mut().ok_or_else(not_an_array)
    }
}

fn touched(node: &Node) -> bool {
    match node {
        Node::Base => false,
        Node::Owned(_) | Node::Removed => true,
        Node::Object(children) => children.values().any(touched),
        Node::Array(children) => children.values().any(touched),
    }
}

fn is_array(node: &Node, base: Option<&Value>) -> bool {
    match node {
        Node::Owned(value) => value.is_array(),
        Node::Array(_) => true,
        Node::Base => base.is_some_and(Value::is_array),
        Node::Object(_) | Node::Removed => false,
    }
}

/// Turn an unchanged container into a partial one with no members touched.
fn split(node: &mut Node, base: Option<&Value>) {
    if let Node::Base = node {
        match base {
            Some(Value::Object(_)) => *node = Node::Object(BTreeMap::new()),
            Some(Value::Array(_)) => *node = Node::Array(BTreeMap::new()),
            _ => {}
        }
    }
}

/// Walk the overlay down `path`, splitting unchanged containers on the way.
/// Nothing is cloned. `None` if there is no value at `path`.
fn descend<'a>(
    node: &'a mut Node,
    base: Option<&'a Value>,
    path: &[PathSegment],
) -> Option<Slot<'a>> {
    let Some((segment, rest)) = path.split_first() else {
        return match node {
            Node::Removed => None,
            Node::Base if base.is_none() => None,
            node => Some(Slot::Node(node, base)),
        };
    };
    split(node, base);
    match node {
        Node::Owned(value) => lookup_mut(value, path).map(Slot::Value),
        Node::Object(children) => {
            let key = object_key(segment);
            let child_base = base.and_then(|b| b.get(key.as_str()));
            let child = match children.entry(key) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    child_base?;
                    entry.insert(Node::Base)
                }
            };
            descend(child, child_base, rest)
        }
        Node::Array(children) => {
            let index = segment_index(segment)?;
            let child_base = base.and_then(|b| b.get(index));
            child_base?;
            descend(children.entry(index).or_insert(Node::Base), child_base, rest)
        }
        Node::Base | Node::Removed => None,
    }
}

/// Make `node` an owned value, cloning only this subtree.
fn own<'a>(node: &'a mut Node, base: Option<&Value>) -> Option<&'a mut Value> {
    if !matches!(node, Node::Owned(_)) {
        *node = Node::Owned(materialize(node, base)?);
    }
    match node {
        Node::Owned(value) => Some(value),
        _ => None,
    }
}

/// The value an overlay node stands for.
fn materialize(node: &Node, base: Option<&Value>) -> Option<Value> {
    match node {
        Node::Base => base.cloned(),
        Node::Owned(value) => Some(value.clone()),
        Node::Removed => None,
        Node::Object(children) => {
            let mut map = Map::new();
            if let Some(Value::Object(old)) = base {
                for (key, value) in old {
                    if !children.contains_key(key) {
                        map.insert(key.clone(), value.clone());
                    }
                }
            }
            for (key, child) in children {
                if let Some(value) = materialize(child, base.and_then(|b| b.get(key.as_str()))) {
                    map.insert(key.clone(), value);
                }
            }
            Some(Value::Object(map))
        }
        Node::Array(children) => {
            let Some(Value::Array(old)) = base else {
                return None;
            };
            old.iter()
                .enumerate()
                .map(|(i, value)| match children.get(&i) {
                    Some(child) => materialize(child, Some(value)),
                    None => Some(value.clone()),
                })
                .collect::<Option<Vec<_>>>()
                .map(Value::Array)
        }
    }
}

fn read<'a>(
    node: &'a Node,
    base: Option<&'a Value>,
    path: &[PathSegment],
) -> Option<Cow<'a, Value>> {
    match node {
        Node::Base => lookup(base?, path).map(Cow::Borrowed),
        Node::Owned(value) => lookup(value, path).map(Cow::Borrowed),
        Node::Removed => None,
        Node::Object(children) => match path.split_first() {
            None => materialize(node, base).map(Cow::Owned),
            Some((segment, rest)) => {
                let key = object_key(segment);
                let child_base = base.and_then(|b| b.get(key.as_str()));
                read(children.get(&key).unwrap_or(&UNCHANGED), child_base, rest)
            }
        },
        Node::Array(children) => match path.split_first() {
            None => materialize(node, base).map(Cow::Owned),
            Some((segment, rest)) => {
                let index = segment_index(segment)?;
                let child_base = base.and_then(|b| b.get(index));
                child_base?;
                read(children.get(&index).unwrap_or(&UNCHANGED), child_base, rest)
            }
        },
    }
}

fn set_child(
    container: &mut Value,
    last: &PathSegment,
    parent: &[PathSegment],
    value: Value,
) -> Result<(), DraftError> {
    match container {
        Value::Object(map) => {
            map.insert(object_key(last), value);
        }
        Value::Array(items) => {
            let index = array_index(last, parent)?;
            if index < items.len() {
                items[index] = value;
            } else if index == items.len() {
                items.push(value);
            } else {
                return Err(DraftError::OutOfBounds {
                    path: to_pointer(parent),
                    index,
                });
            }
        }
        _ => return Err(DraftError::NotAContainer(to_pointer(parent))),
    }
    Ok(())
}

fn remove_child(container: &mut Value, last: &PathSegment) -> Option<Value> {
    match container {
        Value::Object(map) => map.remove(&object_key(last)),
        Value::Array(items) => {
            let index = segment_index(last)?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

fn object_key(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Key(k) => k.clone(),
        PathSegment::Index(i) => i.to_string(),
    }
}

fn segment_index(segment: &PathSegment) -> Option<usize> {
    match segment {
        PathSegment::Index(i) => Some(*i),
        PathSegment::Key(k) => k.parse().ok(),
    }
}

fn array_index(segment: &PathSegment, parent: &[PathSegment]) -> Result<usize, DraftError> {
    segment_index(segment).ok_or_else(|| DraftError::NotAContainer(to_pointer(parent)))
}

pub fn lookup<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get(&object_key(segment)),
        Value::Array(items) => segment_index(segment).and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup_mut<'a>(value: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    path.iter().try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get_mut(&object_key(segment)),
        Value::Array(items) => segment_index(segment).and_then(|i| items.get_mut(i)),
        _ => None,
    })
}

/// The minimal patch list turning `base` into `target`.
pub fn diff(base: &Value, target: &Value) -> Vec<Patch> {
    let mut differ = Differ::default();
    differ.diff_values(&mut Vec::new(), base, target);
    differ.finish().patches
}

#[derive(Default)]
struct Differ {
    patches: Vec<Patch>,
    inverse: Vec<Patch>,
}
impl Differ {
    /// Diff the touched parts of an overlay against the snapshot.
    fn diff_node(&mut self, path: &mut Path, node: &Node, base: Option<&Value>) {
        match node {
            Node::Base => {}
            Node::Owned(value) => self.diff_at(path, base, Some(value)),
            Node::Removed => self.diff_at(path, base, None),
            Node::Object(children) => {
                for (key, child) in children {
                    path.push(PathSegment::Key(key.clone()));
                    self.diff_node(path, child, base.and_then(|b| b.get(key.as_str())));
                    path.pop();
                }
            }
            Node::Array(children) => {
                for (index, child) in children {
                    path.push(PathSegment::Index(*index));
                    self.diff_node(path, child, base.and_then(|b| b.get(*index)));
                    path.pop();
                }
            }
        }
    }

    fn diff_at(&mut self, path: &mut Path, base: Option<&Value>, target: Option<&Value>) {
        match (base, target) {
            (None, None) => {}
            (None, Some(added)) => self.add(path.clone(), added),
            (Some(removed), None) => self.remove(path.clone(), removed),
            (Some(base), Some(target)) => self.diff_values(path, base, target),
        }
    }
    fn diff_values(&mut self, path: &mut Path, base: &Value, target: &Value) {
        // Deep comparison, so that equal rebuilt subtrees produce nothing
        if base == target {
            return;
        }
        match (base, target) {
            (Value::Object(old), Value::Object(new)) => {
                for (key, old_value) in old {
                    path.push(PathSegment::Key(key.clone()));
                    match new.get(key) {
                        Some(new_value) => self.diff_values(path, old_value, new_value),
                        None => self.remove(path.clone(), old_value),
                    }
                    path.pop();
                }
                for (key, new_value) in new {
                    if !old.contains_key(key) {
                        path.push(PathSegment::Key(key.clone()));
                        self.add(path.clone(), new_value);
                        path.pop();
                    }
                }
            }
            (Value::Array(old), Value::Array(new)) => {
                let common = old.len().min(new.len());
                for i in 0..common {
                    path.push(PathSegment::Index(i));
                    self.diff_values(path, &old[i], &new[i]);
                    path.pop();
                }
                for (i, added) in new.iter().enumerate().skip(common) {
                    path.push(PathSegment::Index(i));
                    self.add(path.clone(), added);
                    path.pop();
                }
                // Highest index first, so the remaining indices stay valid
                for i in (common..old.len()).rev() {
                    path.push(PathSegment::Index(i));
                    self.remove(path.clone(), &old[i]);
                    path.pop();
                }
            }
            _ => {
                self.patches.push(Patch::replace(path.clone(), target.clone()));
                self.inverse.push(Patch::replace(path.clone(), base.clone()));
            }
        }
    }

    fn add(&mut self, path: Path, value: &Value) {
        self.inverse.push(Patch::remove(path.clone()));
        self.patches.push(Patch::add(path, value.clone()));
    }

    fn remove(&mut self, path: Path, old: &Value) {
        self.inverse.push(Patch::add(path.clone(), old.clone()));
        self.patches.push(Patch::remove(path));
    }

    fn finish(mut self) -> Finished {
        self.inverse.reverse();
        Finished {
            patches: self.patches,
            inverse_patches: self.inverse,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use commsync_core::{apply_patches, path};
    use serde_json::json;

    fn draft(v: Value) -> Draft {
        Draft::new(Arc::new(v))
    }

    /// Patches reproduce the draft, and the inverse restores the base.
    fn check_round_trip(base: &Value, finished: &Finished, expected: &Value) {
        let applied = apply_patches(base, &finished.patches).unwrap();
        assert_eq!(&applied, expected);
        let restored = apply_patches(&applied, &finished.inverse_patches).unwrap();
        assert_eq!(&restored, base);
    }

    #[test]
    fn test_increment_counter() {
        let mut d = draft(json!({"count": 0}));
        let n = d.get(&path!["count"]).and_then(|v| v.as_i64()).unwrap();
        d.set(&path!["count"], json!(n + 1)).unwrap();
        let finished = d.finish();
        assert_eq!(
            finished.patches,
            vec![Patch::replace(path!["count"], json!(1))]
        );
        assert_eq!(
            finished.inverse_patches,
            vec![Patch::replace(path!["count"], json!(0))]
        );
    }

    #[test]
    fn test_untouched_draft_has_no_patches() {
        let d = draft(json!({"count": 0}));
        assert!(!d.is_modified());
        assert_eq!(d.finish(), Finished::default());
    }

    #[test]
    fn test_writing_the_same_value_has_no_patches() {
        let mut d = draft(json!({"user": {"name": "ada", "tags": [1, 2]}}));
        d.set(&path!["user"], json!({"name": "ada", "tags": [1, 2]}))
            .unwrap();
        assert!(d.finish().patches.is_empty());
    }

    #[test]
    fn test_base_is_not_modified() {
        let base = Arc::new(json!({"a": {"b": 1}}));
        let mut d = Draft::new(base.clone());
        *d.get_mut(&path!["a", "b"]).unwrap() = json!(2);
        assert_eq!(d.get(&path!["a", "b"]).as_deref(), Some(&json!(2)));
        assert_eq!(d.base(), &json!({"a": {"b": 1}}));
        assert_eq!(*base, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_nested_get_mut_only_diffs_changed_leaves() {
        let base = json!({"doc": {"title": "t", "spans": [{"id": 1, "label": "x"}]}, "other": 5});
        let mut d = draft(base.clone());
        let doc = d.get_mut(&path!["doc"]).unwrap();
        doc["spans"][0]["label"] = json!("y");
        doc["spans"]
            .as_array_mut()
            .unwrap()
            .push(json!({"id": 2, "label": "z"}));
        let expected = d.current().into_owned();
        let finished = d.finish();
        assert_eq!(
            finished.patches,
            vec![
                Patch::replace(path!["doc", "spans", 0, "label"], json!("y")),
                Patch::add(path!["doc", "spans", 1], json!({"id": 2, "label": "z"})),
            ]
        );
        check_round_trip(&base, &finished, &expected);
    }

    #[test]
    fn test_object_add_and_remove() {
        let base = json!({"users": {"1": "ada", "2": "bob"}});
        let mut d = draft(base.clone());
        assert_eq!(d.remove(&path!["users", "1"]).unwrap(), json!("ada"));
        d.set(&path!["users", "3"], json!("cy")).unwrap();
        let expected = d.current().into_owned();
        let finished = d.finish();
        assert_eq!(
            finished.patches,
            vec![
                Patch::remove(path!["users", "1"]),
                Patch::add(path!["users", "3"], json!("cy")),
            ]
        );
        check_round_trip(&base, &finished, &expected);
    }

    #[test]
    fn test_array_shift_touches_whole_array() {
        let base = json!({"items": ["a", "b", "c", "d"]});
        let mut d = draft(base.clone());
        d.set(&path!["items", 3], json!("D")).unwrap();
        d.remove(&path!["items", 0]).unwrap();
        d.insert(&path!["items", 1], json!("x")).unwrap();
        let expected = d.current().into_owned();
        assert_eq!(expected, json!({"items": ["b", "x", "c", "D"]}));
        let finished = d.finish();
        // No patch refers to an index relative to an already-shifted array
        assert!(finished
            .patches
            .iter()
            .all(|p| p.path.first() == Some(&PathSegment::from("items"))));
        check_round_trip(&base, &finished, &expected);
    }

    #[test]
    fn test_array_shrink_removes_from_the_end() {
        let base = json!([1, 2, 3, 4]);
        let target = json!([1, 5]);
        let patches = diff(&base, &target);
        assert_eq!(
            patches,
            vec![
                Patch::replace(path![1], json!(5)),
                Patch::remove(path![3]),
                Patch::remove(path![2]),
            ]
        );
        assert_eq!(apply_patches(&base, &patches).unwrap(), target);
    }

    #[test]
    fn test_push_appends() {
        let base = json!({"log": []});
        let mut d = draft(base.clone());
        d.push(&path!["log"], json!("one")).unwrap();
        d.push(&path!["log"], json!("two")).unwrap();
        let expected = d.current().into_owned();
        let finished = d.finish();
        assert_eq!(
            finished.patches,
            vec![
                Patch::add(path!["log", 0], json!("one")),
                Patch::add(path!["log", 1], json!("two")),
            ]
        );
        check_round_trip(&base, &finished, &expected);
    }

    #[test]
    fn test_set_then_remove_cancels_out() {
        let mut d = draft(json!({}));
        d.set(&path!["tmp"], json!(1)).unwrap();
        d.remove(&path!["tmp"]).unwrap();
        assert!(d.finish().patches.is_empty());
    }

    #[test]
    fn test_replace_root() {
        let base = json!({"a": 1});
        let mut d = draft(base.clone());
        d.replace_root(json!({"a": 1, "b": 2}));
        let finished = d.finish();
        assert_eq!(finished.patches, vec![Patch::add(path!["b"], json!(2))]);
        check_round_trip(&base, &finished, &json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_type_change_is_a_replace() {
        let patches = diff(&json!({"a": [1]}), &json!({"a": {"0": 1}}));
        assert_eq!(patches, vec![Patch::replace(path!["a"], json!({"0": 1}))]);
    }

    #[test]
    fn test_diff_of_equal_states_is_empty() {
        let s = json!({"a": [1, {"b": null}], "c": "d"});
        assert!(diff(&s, &s.clone()).is_empty());
    }

    #[test]
    fn test_diff_reproduces_target() {
        let cases = [
            (json!(null), json!({"a": 1})),
            (json!({"a": [1, 2, 3]}), json!({"a": [], "b": true})),
            (json!({"a": {"b": {"c": 1}}}), json!({"a": {"b": {"c": 2, "d": [null]}}})),
            (json!([{"id": 1}, {"id": 2}]), json!([{"id": 2}])),
            (json!("x"), json!(["x"])),
        ];
        for (base, target) in cases {
            let patches = diff(&base, &target);
            assert_eq!(apply_patches(&base, &patches).unwrap(), target);
        }
    }

    #[test]
    fn test_untouched_siblings_are_read_from_the_base() {
        let base = Arc::new(json!({"big": {"docs": [1, 2, 3]}, "count": 0}));
        let mut d = Draft::new(base.clone());
        d.set(&path!["count"], json!(1)).unwrap();
        match d.get(&path!["big"]) {
            Some(Cow::Borrowed(big)) => assert!(std::ptr::eq(big, &base["big"])),
            other => panic!("expected a borrow of the base, got {:?}", other),
        }
        assert_eq!(d.pointer("/big/docs/2").as_deref(), Some(&json!(3)));
        assert_eq!(*d.current(), json!({"big": {"docs": [1, 2, 3]}, "count": 1}));
    }

    #[test]
    fn test_string_index_then_push() {
        let base = json!({"items": ["a"]});
        let mut d = draft(base.clone());
        d.set(&path!["items", "1"], json!("b")).unwrap();
        d.push(&path!["items"], json!("c")).unwrap();
        let expected = d.current().into_owned();
        assert_eq!(expected, json!({"items": ["a", "b", "c"]}));
        let finished = d.finish();
        assert_eq!(
            finished.patches,
            vec![
                Patch::add(path!["items", 1], json!("b")),
                Patch::add(path!["items", 2], json!("c")),
            ]
        );
        check_round_trip(&base, &finished, &expected);
    }

    #[test]
    fn test_element_written_by_index_and_by_key() {
        let base = json!({"items": ["a", "b"], "users": {"0": "ada"}});
        let mut d = draft(base.clone());
        d.set(&path!["items", 0], json!("x")).unwrap();
        d.set(&path!["items", "0"], json!("y")).unwrap();
        d.set(&path!["users", 0], json!("bob")).unwrap();
        let expected = d.current().into_owned();
        let finished = d.finish();
        assert_eq!(
            finished.patches,
            vec![
                Patch::replace(path!["items", 0], json!("y")),
                Patch::replace(path!["users", "0"], json!("bob")),
            ]
        );
        check_round_trip(&base, &finished, &expected);
    }

    #[test]
    fn test_errors() {
        let mut d = draft(json!({"a": [1], "s": "str"}));
        assert_eq!(d.remove(&[]), Err(DraftError::RemoveRoot));
        assert!(matches!(
            d.set(&path!["a", 5], json!(0)),
            Err(DraftError::OutOfBounds { index: 5, .. })
        ));
        assert!(matches!(
            d.set(&path!["s", "x"], json!(0)),
            Err(DraftError::NotAContainer(_))
        ));
        assert!(matches!(
            d.push(&path!["s"], json!(0)),
            Err(DraftError::NotAnArray(_))
        ));
        assert!(matches!(
            d.remove(&path!["nope"]),
            Err(DraftError::Missing(_))
        ));
        assert!(d.get_mut(&path!["nope"]).is_none());
        assert!(d.finish().patches.is_empty());
    }
}
