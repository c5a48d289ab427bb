//! Serialization of [`HashMap`] as a flat key-value map.
//!
//! Every key is serialized through its text form, see [`MapKey::fmt_key`], therefore typed keys
//! only round-trip if the key type is able to parse itself back from a string; [`Key`] values are
//! always read back as [`Key::Str`], and byte-sequence and time keys cannot be read back.

use std::fmt;

use serde::de::{Deserialize, DeserializeSeed, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserializer;

use super::{HashMap, Key, MapKey};

/// [`KeyText`] serializes a key as its text form.
struct KeyText<'k, K: ?Sized>(&'k K);

impl<K: MapKey + ?Sized> fmt::Display for KeyText<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_key(f)
    }
}

impl<K: MapKey + ?Sized> Serialize for KeyText<'_, K> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// [`HashMapVisitor`] calls [`HashMap::set`] for every decoded key-value pair.
pub(crate) struct HashMapVisitor<'m, K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Clone,
{
    hashmap: &'m HashMap<K, V>,
}

impl<'m, K, V> HashMapVisitor<'m, K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Clone,
{
    fn new(hashmap: &'m HashMap<K, V>) -> Self {
        HashMapVisitor { hashmap }
    }
}

impl<'de, K, V> Visitor<'de> for HashMapVisitor<'_, K, V>
where
    K: 'static + Deserialize<'de> + MapKey + Eq,
    V: 'static + Deserialize<'de> + Clone,
{
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a HashMap")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        while let Some((key, value)) = access.next_entry()? {
            self.hashmap.set(key, value);
        }
        Ok(())
    }
}

impl<'de, K, V> DeserializeSeed<'de> for HashMapVisitor<'_, K, V>
where
    K: 'static + Deserialize<'de> + MapKey + Eq,
    V: 'static + Deserialize<'de> + Clone,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<K, V> HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Clone,
{
    /// Decodes a map and inserts every decoded key-value pair into the [`HashMap`].
    ///
    /// The insertion is not transactional: the pairs decoded before an error are kept.
    ///
    /// # Errors
    ///
    /// Returns the error of the deserializer.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<String, u32> = HashMap::new();
    /// let mut deserializer = serde_json::Deserializer::from_str(r#"{"a": 1, "b": "x"}"#);
    ///
    /// assert!(hashmap.set_from(&mut deserializer).is_err());
    /// assert_eq!(hashmap.get("a"), Some(1));
    /// assert!(!hashmap.contains("b"));
    /// ```
    pub fn set_from<'de, D>(&self, deserializer: D) -> Result<(), D::Error>
    where
        K: Deserialize<'de>,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        HashMapVisitor::new(self).deserialize(deserializer)
    }
}

impl<'de, K, V> Deserialize<'de> for HashMap<K, V>
where
    K: 'static + Deserialize<'de> + MapKey + Eq,
    V: 'static + Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hashmap = HashMap::new();
        hashmap.set_from(deserializer)?;
        Ok(hashmap)
    }
}

impl<K, V> Serialize for HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        let mut error = None;
        self.for_each(|k, v| {
            if error.is_none() {
                if let Err(e) = map.serialize_entry(&KeyText(k), v) {
                    error.replace(e);
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        map.end()
    }
}

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Key::Str)
    }
}

#[cfg(feature = "json")]
impl<K, V> HashMap<K, V>
where
    K: 'static + MapKey + Eq,
    V: 'static + Serialize + Clone,
{
    /// Encodes the [`HashMap`] as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<u64, String> = HashMap::new();
    /// assert!(hashmap.set(7, "seven".to_string()).is_none());
    ///
    /// assert_eq!(hashmap.to_json().unwrap(), r#"{"7":"seven"}"#);
    /// ```
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a JSON object into a new [`HashMap`].
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a JSON object of the expected key and value types.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<String, u32> = HashMap::from_json(r#"{"one": 1}"#).unwrap();
    ///
    /// assert_eq!(hashmap.get("one"), Some(1));
    /// assert!(HashMap::<String, u32>::from_json("[1]").is_err());
    /// ```
    pub fn from_json<'de>(json: &'de str) -> Result<Self, serde_json::Error>
    where
        K: Deserialize<'de>,
        V: Deserialize<'de>,
    {
        serde_json::from_str(json)
    }

    /// Decodes a JSON object, and inserts every decoded key-value pair.
    ///
    /// The pairs decoded before an error are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a JSON object of the expected key and value types.
    ///
    /// # Examples
    ///
    /// ```
    /// use stripemap::HashMap;
    ///
    /// let hashmap: HashMap<String, u32> = HashMap::new();
    /// assert!(hashmap.set("one".to_string(), 0).is_none());
    ///
    /// hashmap.merge_json(r#"{"one": 1, "two": 2}"#).unwrap();
    /// assert_eq!(hashmap.get("one"), Some(1));
    /// assert_eq!(hashmap.len(), 2);
    /// ```
    pub fn merge_json<'de>(&self, json: &'de str) -> Result<(), serde_json::Error>
    where
        K: Deserialize<'de>,
        V: Deserialize<'de>,
    {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        self.set_from(&mut deserializer)?;
        deserializer.end()
    }
}
