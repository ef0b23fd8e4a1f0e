//! A map that lives inside an actor
//!
//! Writers are fire-and-forget. Readers hand their answer to a callback, which
//! the marshaler moves onto the caller's actor when it captures one.
//! Collections are copied before they leave the actor.

use crate::actor::Actor;
use crate::audience::Dispatch;
use crate::descriptor::{ActorInterface, InvocationDescriptor, MethodSignature};
use crate::error::{ActorError, Result};
use crate::marshal::{Args, Callback};

use std::collections::HashMap;
use std::hash::Hash;

/// Several operations applied in one invocation
pub type Transaction<K, V> = Box<dyn FnOnce(&mut HashMap<K, V>) + Send + 'static>;

/// In-memory map backing a [`Dictionary`]
#[derive(Debug)]
pub struct DictionaryActor<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for DictionaryActor<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> DictionaryActor<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<K, V>) -> Self {
        Self { entries }
    }
}

impl<K, V> Actor for DictionaryActor<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
}

impl<K, V> DictionaryActor<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn clear(&mut self, args: Args) -> Result<()> {
        args.expect_len(0)?;
        self.entries.clear();
        Ok(())
    }

    fn count(&mut self, mut args: Args) -> Result<()> {
        let callback: Callback<usize> = args.take_callback(0)?;
        callback.call(self.entries.len());
        Ok(())
    }

    fn contains_key(&mut self, mut args: Args) -> Result<()> {
        let key: K = args.take(0)?;
        let callback: Callback<bool> = args.take_callback(1)?;
        callback.call(self.entries.contains_key(&key));
        Ok(())
    }

    fn add(&mut self, mut args: Args) -> Result<()> {
        let key: K = args.take(0)?;
        let value: V = args.take(1)?;
        if self.entries.contains_key(&key) {
            return Err(ActorError::invocation("add", "an entry with the same key already exists"));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    fn insert(&mut self, mut args: Args) -> Result<()> {
        let key: K = args.take(0)?;
        let value: V = args.take(1)?;
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, mut args: Args) -> Result<()> {
        let key: K = args.take(0)?;
        self.entries.remove(&key);
        Ok(())
    }

    fn try_get_value(&mut self, mut args: Args) -> Result<()> {
        let key: K = args.take(0)?;
        let callback: Callback<Option<V>> = args.take_callback(1)?;
        callback.call(self.entries.get(&key).cloned());
        Ok(())
    }

    fn get_value(&mut self, mut args: Args) -> Result<()> {
        let key: K = args.take(0)?;
        let callback: Callback<V> = args.take_callback(1)?;
        let value = self
            .entries
            .get(&key)
            .cloned()
            .ok_or_else(|| ActorError::invocation("get_value", "key not present"))?;
        callback.call(value);
        Ok(())
    }

    fn keys(&mut self, mut args: Args) -> Result<()> {
        let callback: Callback<Vec<K>> = args.take_callback(0)?;
        callback.call(self.entries.keys().cloned().collect());
        Ok(())
    }

    fn values(&mut self, mut args: Args) -> Result<()> {
        let callback: Callback<Vec<V>> = args.take_callback(0)?;
        callback.call(self.entries.values().cloned().collect());
        Ok(())
    }

    fn entries(&mut self, mut args: Args) -> Result<()> {
        let callback: Callback<Vec<(K, V)>> = args.take_callback(0)?;
        let snapshot = self
            .entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        callback.call(snapshot);
        Ok(())
    }

    fn atomically(&mut self, mut args: Args) -> Result<()> {
        let transaction: Transaction<K, V> = args.take(0)?;
        transaction(&mut self.entries);
        Ok(())
    }
}

/// Interface adapter over a [`DictionaryActor`]
pub struct Dictionary<K, V> {
    dispatch: Dispatch<DictionaryActor<K, V>>,
}

impl<K, V> Clone for Dictionary<K, V> {
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<K, V> Dictionary<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    const CLEAR: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("clear", DictionaryActor::clear);
    const COUNT: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("count", DictionaryActor::count);
    const CONTAINS_KEY: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("contains_key", DictionaryActor::contains_key);
    const ADD: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("add", DictionaryActor::add);
    const INSERT: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("insert", DictionaryActor::insert);
    const REMOVE: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("remove", DictionaryActor::remove);
    const TRY_GET_VALUE: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("try_get_value", DictionaryActor::try_get_value);
    const GET_VALUE: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("get_value", DictionaryActor::get_value);
    const KEYS: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("keys", DictionaryActor::keys);
    const VALUES: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("values", DictionaryActor::values);
    const ENTRIES: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("entries", DictionaryActor::entries);
    const ATOMICALLY: InvocationDescriptor<DictionaryActor<K, V>> =
        InvocationDescriptor::action("atomically", DictionaryActor::atomically);

    pub fn clear(&self) -> Result<()> {
        self.dispatch.invoke(&Self::CLEAR, Args::new())
    }

    pub fn count(&self, callback: Callback<usize>) -> Result<()> {
        self.dispatch.invoke(&Self::COUNT, Args::new().callback(callback))
    }

    pub fn contains_key(&self, key: K, callback: Callback<bool>) -> Result<()> {
        self.dispatch
            .invoke(&Self::CONTAINS_KEY, Args::new().value(key).callback(callback))
    }

    /// Add a new entry; an existing key is a fault inside the dictionary
    pub fn add(&self, key: K, value: V) -> Result<()> {
        self.dispatch.invoke(&Self::ADD, Args::new().value(key).value(value))
    }

    /// Set the value for `key`, replacing any previous one
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        self.dispatch.invoke(&Self::INSERT, Args::new().value(key).value(value))
    }

    pub fn remove(&self, key: K) -> Result<()> {
        self.dispatch.invoke(&Self::REMOVE, Args::new().value(key))
    }

    pub fn try_get_value(&self, key: K, callback: Callback<Option<V>>) -> Result<()> {
        self.dispatch
            .invoke(&Self::TRY_GET_VALUE, Args::new().value(key).callback(callback))
    }

    /// Read a value that must exist; a missing key is a fault and the
    /// callback is not called
    pub fn get_value(&self, key: K, callback: Callback<V>) -> Result<()> {
        self.dispatch
            .invoke(&Self::GET_VALUE, Args::new().value(key).callback(callback))
    }

    pub fn keys(&self, callback: Callback<Vec<K>>) -> Result<()> {
        self.dispatch.invoke(&Self::KEYS, Args::new().callback(callback))
    }

    pub fn values(&self, callback: Callback<Vec<V>>) -> Result<()> {
        self.dispatch.invoke(&Self::VALUES, Args::new().callback(callback))
    }

    pub fn entries(&self, callback: Callback<Vec<(K, V)>>) -> Result<()> {
        self.dispatch.invoke(&Self::ENTRIES, Args::new().callback(callback))
    }

    /// Apply `transaction` to the map in a single invocation
    ///
    /// The transaction runs on the dictionary's queue. It must not touch the
    /// calling actor's state.
    pub fn atomically<F>(&self, transaction: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<K, V>) + Send + 'static,
    {
        let transaction: Transaction<K, V> = Box::new(transaction);
        self.dispatch.invoke(&Self::ATOMICALLY, Args::new().value(transaction))
    }

    pub fn dispatch(&self) -> &Dispatch<DictionaryActor<K, V>> {
        &self.dispatch
    }
}

impl<K, V> ActorInterface for Dictionary<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    type Target = DictionaryActor<K, V>;

    fn name() -> &'static str {
        "Dictionary"
    }

    fn signatures() -> Vec<MethodSignature> {
        vec![
            Self::CLEAR.signature(),
            Self::COUNT.signature(),
            Self::CONTAINS_KEY.signature(),
            Self::ADD.signature(),
            Self::INSERT.signature(),
            Self::REMOVE.signature(),
            Self::TRY_GET_VALUE.signature(),
            Self::GET_VALUE.signature(),
            Self::KEYS.signature(),
            Self::VALUES.signature(),
            Self::ENTRIES.signature(),
            Self::ATOMICALLY.signature(),
        ]
    }

    fn from_dispatch(dispatch: Dispatch<Self::Target>) -> Self {
        Self { dispatch }
    }
}
