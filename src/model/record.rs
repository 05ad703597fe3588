/// A typed id of a stored document. The type parameter keeps video ids, user ids and comment ids
/// from being mixed up; on the wire it is a plain string.
pub struct Record<T> {
    inner: String,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Record<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Record {
            inner: id.into(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl<T> AsRef<str> for Record<T> {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl<T> std::str::FromStr for Record<T> {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl<T> std::fmt::Debug for Record<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl<T> std::fmt::Display for Record<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl<T> std::clone::Clone for Record<T> {
    fn clone(&self) -> Self {
        Self::new(self.inner.clone())
    }
}

impl<T> serde::Serialize for Record<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl<'de, T> serde::Deserialize<'de> for Record<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        if id.is_empty() {
            return Err(serde::de::Error::custom("record id must not be empty"));
        }
        Ok(Self::new(id))
    }
}

impl<T> std::cmp::PartialEq for Record<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> std::cmp::Eq for Record<T> {}

impl<T> std::hash::Hash for Record<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.hash(state)
    }
}

impl<T> From<Record<T>> for serde_json::Value {
    fn from(record: Record<T>) -> Self {
        serde_json::Value::String(record.inner)
    }
}
