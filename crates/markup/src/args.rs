//! Parsed tag arguments.

use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arg {
    pub name: String,
    /// `None` for valueless arguments (`<input checked>`).
    pub value: Option<String>,
}

/// Arguments of a tag in source order. Duplicate names are kept; lookups see
/// the last occurrence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args {
    items: Vec<Arg>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        self.items.push(Arg {
            name: name.into(),
            value,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
        self.items.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|arg| arg.name == name)
    }

    /// Value of the last argument called `name`; valueless arguments yield
    /// `Some(None)`.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.items
            .iter()
            .rev()
            .find(|arg| arg.name == name)
            .map(|arg| arg.value.as_deref())
    }

    /// Value of `name`, with valueless arguments reading as their own name.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .rev()
            .find(|arg| arg.name == name)
            .map(|arg| arg.value.as_deref().unwrap_or(&arg.name))
    }

    /// Name to value map. Valueless arguments map to `default`, or to their
    /// own name when no default is given.
    pub fn to_map(&self, default: Option<&str>) -> BTreeMap<String, String> {
        self.items
            .iter()
            .map(|arg| {
                let value = match (&arg.value, default) {
                    (Some(value), _) => value.clone(),
                    (None, Some(default)) => default.to_string(),
                    (None, None) => arg.name.clone(),
                };
                (arg.name.clone(), value)
            })
            .collect()
    }

    /// Replace the argument at `index` with `spliced`, keeping source order.
    pub(crate) fn splice(&mut self, index: usize, spliced: Args) {
        let _ = self.items.splice(index..=index, spliced.items);
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a Arg;
    type IntoIter = std::slice::Iter<'a, Arg>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<(String, Option<String>)> for Args {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            items: iter
                .into_iter()
                .map(|(name, value)| Arg { name, value })
                .collect(),
        }
    }
}

/// Renders as `[name="value" flag]`.
impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, arg) in self.items.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&arg.name)?;
            if let Some(value) = &arg.value {
                write!(f, "={value:?}")?;
            }
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Args {
        let mut args = Args::new();
        args.push("href", Some("/a".to_string()));
        args.push("checked", None);
        args.push("href", Some("/b".to_string()));
        args
    }

    #[test]
    fn last_duplicate_wins() {
        let args = sample();
        assert_eq!(args.get("href"), Some(Some("/b")));
        assert_eq!(args.get("checked"), Some(None));
        assert_eq!(args.get("missing"), None);
    }

    #[test]
    fn valueless_arguments_use_default_or_name() {
        let args = sample();
        let map = args.to_map(None);
        assert_eq!(map["checked"], "checked");
        assert_eq!(map["href"], "/b");
        let map = args.to_map(Some(""));
        assert_eq!(map["checked"], "");
        assert_eq!(args.value("checked"), Some("checked"));
    }

    #[test]
    fn splice_replaces_in_place() {
        let mut args = sample();
        let spliced: Args = [
            ("a".to_string(), Some("1".to_string())),
            ("b".to_string(), None),
        ]
        .into_iter()
        .collect();
        args.splice(1, spliced);
        assert_eq!(args.to_string(), r#"[href="/a" a="1" b href="/b"]"#);
    }
}
