use std::borrow::Borrow;
use std::ops::{Deref, Range};
use std::sync::Arc;

/// A string type that can either own its contents, borrow them from
/// some other string, or reference a slice of a shared string.
/// This makes it possible for header and body values produced during
/// parsing to alias the original input without copying, while still
/// allowing owned values to be handed across the emitter boundary.
#[derive(Clone)]
pub enum SharedString<'a> {
    Owned(Arc<String>),
    Borrowed(&'a str),
    Sliced {
        other: Arc<String>,
        range: Range<usize>,
    },
}

impl<'a> SharedString<'a> {
    pub fn slice(&self, slice_range: Range<usize>) -> SharedString<'a> {
        match self {
            Self::Owned(s) => Self::Sliced {
                other: Arc::clone(s),
                range: slice_range,
            },
            Self::Borrowed(s) => Self::Borrowed(&s[slice_range]),
            Self::Sliced { other, range } => Self::Sliced {
                other: Arc::clone(other),
                range: Range {
                    start: range.start + slice_range.start,
                    end: range.start + slice_range.end,
                },
            },
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Owned(s) => s.as_str(),
            Self::Borrowed(s) => s,
            Self::Sliced { other, range } => &other[range.clone()],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Owned(s) => s.len(),
            Self::Borrowed(s) => s.len(),
            Self::Sliced { range, .. } => range.end - range.start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach from any borrowed lifetime, producing a `'static` value.
    /// Owned and sliced variants simply bump the refcount.
    pub fn to_static(&self) -> SharedString<'static> {
        match self {
            Self::Owned(s) => SharedString::Owned(Arc::clone(s)),
            Self::Borrowed(s) => SharedString::Owned(Arc::new(s.to_string())),
            Self::Sliced { other, range } => SharedString::Sliced {
                other: Arc::clone(other),
                range: range.clone(),
            },
        }
    }
}

impl std::fmt::Debug for SharedString<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.as_str().fmt(fmt)
    }
}

impl std::fmt::Display for SharedString<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.as_str().fmt(fmt)
    }
}

impl Deref for SharedString<'_> {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for SharedString<'_> {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::ops::Index<usize> for SharedString<'_> {
    type Output = u8;

    fn index(&self, index: usize) -> &Self::Output {
        &self.as_str().as_bytes()[index]
    }
}

impl<'a> From<&'a str> for SharedString<'a> {
    fn from(s: &'a str) -> SharedString<'a> {
        SharedString::Borrowed(s)
    }
}

impl From<String> for SharedString<'_> {
    fn from(s: String) -> Self {
        SharedString::Owned(Arc::new(s))
    }
}

impl PartialEq<str> for SharedString<'_> {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for SharedString<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialEq<SharedString<'_>> for SharedString<'_> {
    fn eq(&self, other: &SharedString) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for SharedString<'_> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slicing() {
        let s: SharedString = "hello world".into();
        let hello = s.slice(0..5);
        assert_eq!(hello, "hello");
        let world = s.slice(6..11);
        assert_eq!(world, "world");

        let owned: SharedString = "hello world".to_string().into();
        let hello = owned.slice(0..5);
        assert_eq!(hello, "hello");
        let ell = hello.slice(1..4);
        assert_eq!(ell, "ell");
    }

    #[test]
    fn to_static_preserves_contents() {
        let text = "subject line".to_string();
        let owned = {
            let s: SharedString = text.as_str().into();
            s.slice(0..7).to_static()
        };
        drop(text);
        assert_eq!(owned, "subject");
    }
}
