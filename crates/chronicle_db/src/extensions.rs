//! Typed capability slots attached to a model.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Default)]
pub(crate) struct Extensions {
    map: HashMap<TypeId, Rc<dyn Any>>,
}

impl Extensions {
    /// Insert `value` unless a value of the same type is already present.
    pub(crate) fn insert_if_absent<T: 'static>(&mut self, value: T) -> bool {
        let key = TypeId::of::<T>();
        if self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key, Rc::new(value));
        true
    }

    pub(crate) fn get<T: 'static>(&self) -> Option<Rc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }
}
