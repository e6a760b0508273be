use crate::{AddressList, Header, Mailbox, MailboxList, MimeParameters, Result};
use chrono::{DateTime, FixedOffset};

/// Represents an ordered list of headers.
/// Note that there may be multiple headers with the same name.
/// Derefs to the underlying `Vec<Header>` for iteration and mutation,
/// but provides some accessors for retrieving headers by name;
/// name lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct HeaderMap<'a> {
    headers: Vec<Header<'a>>,
}

impl<'a> std::ops::Deref for HeaderMap<'a> {
    type Target = Vec<Header<'a>>;
    fn deref(&self) -> &Vec<Header<'a>> {
        &self.headers
    }
}

impl<'a> std::ops::DerefMut for HeaderMap<'a> {
    fn deref_mut(&mut self) -> &mut Vec<Header<'a>> {
        &mut self.headers
    }
}

impl<'a> HeaderMap<'a> {
    pub fn new(headers: Vec<Header<'a>>) -> Self {
        Self { headers }
    }

    pub fn to_static(&self) -> HeaderMap<'static> {
        HeaderMap {
            headers: self.headers.iter().map(|h| h.to_static()).collect(),
        }
    }

    pub fn get_first(&'a self, name: &str) -> Option<&Header<'a>> {
        self.iter_named(name).next()
    }

    pub fn get_last(&'a self, name: &str) -> Option<&Header<'a>> {
        self.iter_named(name).next_back()
    }

    pub fn iter_named<'name>(
        &'a self,
        name: &'name str,
    ) -> impl DoubleEndedIterator<Item = &'a Header<'a>> + 'name
    where
        'a: 'name,
    {
        self.headers
            .iter()
            .filter(|header| header.get_name().eq_ignore_ascii_case(name))
    }

    /// The raw (undecoded, unfolded) values of every header with the
    /// given name, in order of appearance.
    pub fn raw_values<'name>(&'a self, name: &'name str) -> impl Iterator<Item = &'a str> + 'name
    where
        'a: 'name,
    {
        self.iter_named(name).map(|header| header.get_raw_value())
    }

    pub fn content_type(&'a self) -> Result<Option<MimeParameters>> {
        match self.get_last("Content-Type") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_content_type()?)),
        }
    }

    pub fn content_transfer_encoding(&'a self) -> Result<Option<MimeParameters>> {
        match self.get_last("Content-Transfer-Encoding") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_content_transfer_encoding()?)),
        }
    }

    pub fn content_disposition(&'a self) -> Result<Option<MimeParameters>> {
        match self.get_last("Content-Disposition") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_content_disposition()?)),
        }
    }

    pub fn from(&'a self) -> Result<Option<MailboxList>> {
        match self.get_first("From") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_mailbox_list()?)),
        }
    }

    pub fn to(&'a self) -> Result<Option<AddressList>> {
        match self.get_first("To") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_address_list()?)),
        }
    }

    pub fn cc(&'a self) -> Result<Option<AddressList>> {
        match self.get_first("Cc") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_address_list()?)),
        }
    }

    pub fn reply_to(&'a self) -> Result<Option<AddressList>> {
        match self.get_first("Reply-To") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_address_list()?)),
        }
    }

    pub fn sender(&'a self) -> Result<Option<Mailbox>> {
        match self.get_first("Sender") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_mailbox()?)),
        }
    }

    pub fn subject(&'a self) -> Result<Option<String>> {
        match self.get_first("Subject") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_unstructured()?)),
        }
    }

    pub fn date(&'a self) -> Result<Option<DateTime<FixedOffset>>> {
        match self.get_first("Date") {
            None => Ok(None),
            Some(header) => Ok(Some(header.as_date()?)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn map() -> HeaderMap<'static> {
        HeaderMap::new(vec![
            Header::with_name_value("Subject", "hello"),
            Header::with_name_value("Received", "first hop"),
            Header::with_name_value("received", "second hop"),
            Header::with_name_value("Content-Type", "text/plain; charset=utf-8"),
        ])
    }

    #[test]
    fn case_insensitive_lookup() {
        let map = map();
        assert_eq!(map.get_first("RECEIVED").unwrap().get_raw_value(), "first hop");
        assert_eq!(map.get_last("Received").unwrap().get_raw_value(), "second hop");
        let hops: Vec<_> = map.raw_values("Received").collect();
        k9::assert_equal!(hops, vec!["first hop", "second hop"]);
        assert!(map.get_first("X-Missing").is_none());
    }

    #[test]
    fn typed_accessors() {
        let map = map();
        let ct = map.content_type().unwrap().unwrap();
        k9::assert_equal!(ct.value.as_str(), "text/plain");
        k9::assert_equal!(ct.get("charset").unwrap(), "utf-8");
        k9::assert_equal!(map.subject().unwrap().unwrap(), "hello");
        assert!(map.from().unwrap().is_none());
    }
}
