use super::entry::Entry;
use crate::{LdapMuxError, Result};

/// A bidirectional cursor over directory entries.
///
/// A fresh cursor is positioned before the first element. `next` and
/// `previous` move the cursor and report whether it now rests on an
/// element; `get` returns that element.
pub trait EntryCursor: Send {
    fn before_first(&mut self) -> Result<()>;

    fn after_last(&mut self) -> Result<()>;

    fn next(&mut self) -> Result<bool>;

    fn previous(&mut self) -> Result<bool>;

    fn get(&self) -> Result<&Entry>;

    /// Position just before `entry`.
    fn before(&mut self, entry: &Entry) -> Result<()>;

    /// Position just after `entry`.
    fn after(&mut self, entry: &Entry) -> Result<()>;
}

impl<C: EntryCursor + ?Sized> EntryCursor for Box<C> {
    fn before_first(&mut self) -> Result<()> {
        (**self).before_first()
    }

    fn after_last(&mut self) -> Result<()> {
        (**self).after_last()
    }

    fn next(&mut self) -> Result<bool> {
        (**self).next()
    }

    fn previous(&mut self) -> Result<bool> {
        (**self).previous()
    }

    fn get(&self) -> Result<&Entry> {
        (**self).get()
    }

    fn before(&mut self, entry: &Entry) -> Result<()> {
        (**self).before(entry)
    }

    fn after(&mut self, entry: &Entry) -> Result<()> {
        (**self).after(entry)
    }
}

/// Cursor over an ordered, owned list of entries.
#[derive(Debug, Clone)]
pub struct ListCursor {
    entries: Vec<Entry>,
    position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

impl ListCursor {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            position: Position::BeforeFirst,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, entry: &Entry) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e.dn() == entry.dn())
            .ok_or_else(|| LdapMuxError::Cursor(format!("{} is not part of this cursor", entry.dn())))
    }
}

impl EntryCursor for ListCursor {
    fn before_first(&mut self) -> Result<()> {
        self.position = Position::BeforeFirst;
        Ok(())
    }

    fn after_last(&mut self) -> Result<()> {
        self.position = Position::AfterLast;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        let candidate = match self.position {
            Position::BeforeFirst => 0,
            Position::At(i) => i + 1,
            Position::AfterLast => return Ok(false),
        };
        if candidate < self.entries.len() {
            self.position = Position::At(candidate);
            Ok(true)
        } else {
            self.position = Position::AfterLast;
            Ok(false)
        }
    }

    fn previous(&mut self) -> Result<bool> {
        let candidate = match self.position {
            Position::AfterLast => self.entries.len().checked_sub(1),
            Position::At(i) => i.checked_sub(1),
            Position::BeforeFirst => return Ok(false),
        };
        match candidate {
            Some(i) if i < self.entries.len() => {
                self.position = Position::At(i);
                Ok(true)
            }
            _ => {
                self.position = Position::BeforeFirst;
                Ok(false)
            }
        }
    }

    fn get(&self) -> Result<&Entry> {
        match self.position {
            Position::At(i) => Ok(&self.entries[i]),
            Position::BeforeFirst => Err(LdapMuxError::Cursor(
                "Cursor is positioned before the first element".to_string(),
            )),
            Position::AfterLast => Err(LdapMuxError::Cursor(
                "Cursor is positioned after the last element".to_string(),
            )),
        }
    }

    fn before(&mut self, entry: &Entry) -> Result<()> {
        let index = self.index_of(entry)?;
        self.position = match index {
            0 => Position::BeforeFirst,
            i => Position::At(i - 1),
        };
        Ok(())
    }

    fn after(&mut self, entry: &Entry) -> Result<()> {
        let index = self.index_of(entry)?;
        self.position = Position::At(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;

    fn entries(names: &[&str]) -> Vec<Entry> {
        names
            .iter()
            .map(|n| Entry::new(Dn::parse(&format!("cn={},dc=x", n)).unwrap()))
            .collect()
    }

    fn drain_forward(cursor: &mut ListCursor) -> Vec<String> {
        let mut out = Vec::new();
        while cursor.next().unwrap() {
            out.push(cursor.get().unwrap().dn().rdn().unwrap().to_string());
        }
        out
    }

    #[test]
    fn test_forward_and_backward() {
        let mut cursor = ListCursor::new(entries(&["a", "b", "c"]));
        assert!(cursor.get().is_err());
        assert_eq!(drain_forward(&mut cursor), vec!["cn=a", "cn=b", "cn=c"]);
        assert!(cursor.get().is_err());

        let mut back = Vec::new();
        while cursor.previous().unwrap() {
            back.push(cursor.get().unwrap().dn().rdn().unwrap().to_string());
        }
        assert_eq!(back, vec!["cn=c", "cn=b", "cn=a"]);
    }

    #[test]
    fn test_before_and_after_positioning() {
        let list = entries(&["a", "b", "c"]);
        let mut cursor = ListCursor::new(list.clone());

        cursor.before(&list[1]).unwrap();
        assert_eq!(drain_forward(&mut cursor), vec!["cn=b", "cn=c"]);

        cursor.after(&list[0]).unwrap();
        assert_eq!(drain_forward(&mut cursor), vec!["cn=b", "cn=c"]);

        let stranger = Entry::new(Dn::parse("cn=zz,dc=x").unwrap());
        assert!(matches!(cursor.before(&stranger), Err(LdapMuxError::Cursor(_))));
    }

    #[test]
    fn test_empty_cursor() {
        let mut cursor = ListCursor::new(Vec::new());
        assert!(cursor.is_empty());
        assert!(!cursor.next().unwrap());
        assert!(!cursor.previous().unwrap());
    }
}
