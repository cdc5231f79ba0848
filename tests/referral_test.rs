use ldapmux::directory::{Directory, Entry, EntryCursor, ListCursor, Modification, Partition};
use ldapmux::interceptor::{Interceptor, InterceptorChain, Next, ReferralInterceptor, SearchParams};
use ldapmux::ldap::{LdapFilter, SearchScope};
use ldapmux::referral::{ReferralAwareCursor, ReferralLut, ReferralMode, ReferralRedirect};
use ldapmux::{Dn, LdapMuxError};
use std::sync::Arc;

fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}

fn referral(name: &str, url: &str) -> Entry {
    Entry::referral(dn(name), vec![url.to_string()])
}

fn rdns(cursor: &mut impl EntryCursor, forward: bool) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let moved = if forward { cursor.next() } else { cursor.previous() };
        if !moved.unwrap() {
            return seen;
        }
        seen.push(cursor.get().unwrap().dn().rdn().unwrap().to_string());
    }
}

fn scan_fixture() -> (Vec<Entry>, Arc<ReferralLut>) {
    let entries = vec![
        referral("ou=e1,dc=x", "ldap://h/ou=e1"),
        Entry::new(dn("ou=e2,dc=x")),
        referral("ou=e3,dc=x", "ldap://h/ou=e3"),
        Entry::new(dn("ou=e4,dc=x")),
    ];
    let lut = Arc::new(ReferralLut::new());
    lut.rebuild(&entries);
    (entries, lut)
}

#[test]
fn test_lut_tracks_add_delete_and_change() {
    let lut = ReferralLut::new();
    let a = dn("ou=a,dc=x");
    assert!(!lut.is_referral(&a));

    lut.referral_added(&a);
    assert!(lut.is_referral(&dn("OU=A, DC=X")));
    lut.referral_deleted(&a);
    assert!(!lut.is_referral(&a));

    lut.referral_added(&a);
    lut.referral_changed(&a, &dn("ou=b,dc=x"));
    assert!(!lut.is_referral(&a));
    assert!(lut.is_referral(&dn("ou=b,dc=x")));
    assert_eq!(lut.len(), 1);
}

#[test]
fn test_farthest_referral_ancestor_prefers_most_senior() {
    let lut = ReferralLut::new();
    lut.referral_added(&dn("ou=a,dc=x"));
    lut.referral_added(&dn("ou=b,ou=a,dc=x"));

    assert_eq!(
        lut.farthest_referral_ancestor(&dn("cn=leaf,ou=b,ou=a,dc=x")),
        Some(dn("ou=a,dc=x"))
    );
    assert_eq!(lut.farthest_referral_ancestor(&dn("ou=a,dc=x")), None);
    assert_eq!(lut.farthest_referral_ancestor(&dn("cn=other,dc=x")), None);
}

#[test]
fn test_cursor_defers_referrals_to_the_end() {
    let (entries, lut) = scan_fixture();
    let mut cursor =
        ReferralAwareCursor::new(ListCursor::new(entries), lut, SearchScope::WholeSubtree, false);

    assert_eq!(rdns(&mut cursor, true), vec!["ou=e2", "ou=e4", "ou=e1", "ou=e3"]);
    assert!(!cursor.next().unwrap());
}

#[test]
fn test_direction_switch_resets_deferred_state() {
    let (entries, lut) = scan_fixture();
    let mut cursor =
        ReferralAwareCursor::new(ListCursor::new(entries), lut, SearchScope::WholeSubtree, false);

    assert!(cursor.next().unwrap());
    assert_eq!(cursor.get().unwrap().dn(), &dn("ou=e2,dc=x"));
    assert_eq!(cursor.deferred_len(), 1);

    // Going back starts over from the far end.
    assert_eq!(rdns(&mut cursor, false), vec!["ou=e4", "ou=e2", "ou=e1", "ou=e3"]);
    assert_eq!(cursor.deferred_len(), 2);

    assert_eq!(rdns(&mut cursor, true), vec!["ou=e2", "ou=e4", "ou=e1", "ou=e3"]);
}

#[test]
fn test_redirect_rewrites_dn_and_scope() {
    let entry = referral("ou=a,dc=x", "ldap://remote:1389/ou=people,o=remote");

    let redirect = ReferralRedirect::build(&entry, &dn("cn=z,ou=a,dc=x"), Some(SearchScope::SingleLevel));
    assert_eq!(redirect.urls, vec!["ldap://remote:1389/cn=z,ou=people,o=remote??base"]);

    let redirect = ReferralRedirect::build(&entry, entry.dn(), None);
    assert_eq!(redirect.urls, vec!["ldap://remote:1389/ou=people,o=remote"]);
}

fn chain(mode: ReferralMode) -> (InterceptorChain, Arc<ReferralLut>) {
    let directory = Directory::new(dn("dc=x"));
    for entry in [
        Entry::new(dn("dc=x")),
        Entry::new(dn("ou=local,dc=x")).with_attribute("ou", ["local"]),
        Entry::new(dn("ou=other,dc=x")),
        referral("ou=remote,dc=x", "ldap://remote/ou=remote,o=r"),
    ] {
        directory.add(entry).unwrap();
    }

    let lut = Arc::new(ReferralLut::new());
    lut.rebuild(&directory.entries());
    let chain = InterceptorChain::new(Arc::new(directory))
        .with(Arc::new(ReferralInterceptor::new(mode, Arc::clone(&lut))));
    (chain, lut)
}

fn search_all(chain: &InterceptorChain, base: &str, scope: SearchScope) -> ldapmux::Result<Box<dyn EntryCursor>> {
    chain.search(&SearchParams::new(dn(base), scope, LdapFilter::match_all()))
}

#[test]
fn test_interceptor_keeps_lut_in_sync() {
    let (chain, lut) = chain(ReferralMode::Ignore);
    assert_eq!(lut.len(), 1);

    // add
    chain
        .add(referral("ou=new,dc=x", "ldap://remote/ou=new,o=r"))
        .unwrap();
    assert!(lut.is_referral(&dn("ou=new,dc=x")));

    // modify: becomes a referral, then stops being one
    let local = dn("ou=local,dc=x");
    chain
        .modify(
            &local,
            &[
                Modification::Add("objectClass".to_string(), vec!["referral".to_string()]),
                Modification::Add("ref".to_string(), vec!["ldap://remote/ou=local,o=r".to_string()]),
            ],
        )
        .unwrap();
    assert!(lut.is_referral(&local));
    chain
        .modify(&local, &[Modification::Delete("ref".to_string(), Vec::new())])
        .unwrap();
    assert!(!lut.is_referral(&local));

    // rename
    let renamed = chain.rename(&dn("ou=new,dc=x"), "ou=newer").unwrap();
    assert_eq!(renamed, dn("ou=newer,dc=x"));
    assert!(!lut.is_referral(&dn("ou=new,dc=x")));
    assert!(lut.is_referral(&renamed));

    // move
    let moved = chain.move_entry(&renamed, &dn("ou=other,dc=x")).unwrap();
    assert_eq!(moved, dn("ou=newer,ou=other,dc=x"));
    assert!(lut.is_referral(&moved));
    assert!(!lut.is_referral(&renamed));

    // delete
    chain.delete(&moved).unwrap();
    assert!(!lut.is_referral(&moved));
    assert_eq!(lut.len(), 1);
}

/// Files renamed and moved entries under `ou=archive` with a suffixed RDN.
struct Archiver;

impl Interceptor for Archiver {
    fn name(&self) -> &str {
        "archiver"
    }

    fn rename(&self, next: Next<'_>, dn: &Dn, new_rdn: &str) -> ldapmux::Result<Dn> {
        next.rename(dn, &format!("{}-archived", new_rdn))
    }

    fn move_entry(&self, next: Next<'_>, dn: &Dn, _new_parent: &Dn) -> ldapmux::Result<Dn> {
        next.move_entry(dn, &Dn::parse("ou=other,dc=x")?)
    }
}

#[test]
fn test_lut_follows_the_dn_the_partition_stored() {
    let directory = Directory::new(dn("dc=x"));
    for entry in [
        Entry::new(dn("dc=x")),
        Entry::new(dn("ou=local,dc=x")),
        Entry::new(dn("ou=other,dc=x")),
        referral("ou=remote,dc=x", "ldap://remote/ou=remote,o=r"),
    ] {
        directory.add(entry).unwrap();
    }
    let lut = Arc::new(ReferralLut::new());
    lut.rebuild(&directory.entries());
    let chain = InterceptorChain::new(Arc::new(directory))
        .with(Arc::new(ReferralInterceptor::new(ReferralMode::Ignore, Arc::clone(&lut))))
        .with(Arc::new(Archiver));

    let renamed = chain.rename(&dn("ou=remote,dc=x"), "ou=gone").unwrap();
    assert_eq!(renamed, dn("ou=gone-archived,dc=x"));
    assert!(lut.is_referral(&renamed));
    assert!(!lut.is_referral(&dn("ou=gone,dc=x")));
    assert!(chain.lookup(&renamed).unwrap().is_some());

    let moved = chain.move_entry(&renamed, &dn("ou=local,dc=x")).unwrap();
    assert_eq!(moved, dn("ou=gone-archived,ou=other,dc=x"));
    assert!(lut.is_referral(&moved));
    assert!(!lut.is_referral(&dn("ou=gone-archived,ou=local,dc=x")));
    assert_eq!(lut.len(), 1);
}

#[test]
fn test_lut_unchanged_when_partition_rejects() {
    let (chain, lut) = chain(ReferralMode::Ignore);
    let orphan = referral("ou=orphan,ou=missing,dc=x", "ldap://remote/o=r");
    assert!(matches!(chain.add(orphan), Err(LdapMuxError::NoSuchObject(_))));
    assert!(!lut.is_referral(&dn("ou=orphan,ou=missing,dc=x")));
}

#[test]
fn test_throw_mode_redirects_targets_and_scan_results() {
    let (chain, _lut) = chain(ReferralMode::Throw);

    match chain.lookup(&dn("cn=leaf,ou=remote,dc=x")) {
        Err(LdapMuxError::Referral(redirect)) => {
            assert_eq!(redirect.urls, vec!["ldap://remote/cn=leaf,ou=remote,o=r"])
        }
        other => panic!("expected referral, got {:?}", other),
    }
    assert!(matches!(
        chain.delete(&dn("ou=remote,dc=x")),
        Err(LdapMuxError::Referral(_))
    ));

    let mut cursor = search_all(&chain, "dc=x", SearchScope::SingleLevel).unwrap();
    let mut plain = Vec::new();
    let mut redirects = Vec::new();
    loop {
        match cursor.next() {
            Ok(true) => plain.push(cursor.get().unwrap().dn().to_string()),
            Ok(false) => break,
            Err(LdapMuxError::Referral(redirect)) => redirects.push(redirect.urls),
            Err(e) => panic!("unexpected {}", e),
        }
    }
    assert_eq!(plain, vec!["ou=local,dc=x", "ou=other,dc=x"]);
    assert_eq!(redirects, vec![vec!["ldap://remote/ou=remote,o=r??base".to_string()]]);
}

#[test]
fn test_throw_finding_base_returns_scan_results_inline() {
    let (chain, _lut) = chain(ReferralMode::ThrowFindingBase);

    assert!(matches!(
        search_all(&chain, "ou=remote,dc=x", SearchScope::WholeSubtree),
        Err(LdapMuxError::Referral(_))
    ));

    let mut cursor = search_all(&chain, "dc=x", SearchScope::SingleLevel).unwrap();
    let mut seen = Vec::new();
    while cursor.next().unwrap() {
        seen.push(cursor.get().unwrap().dn().to_string());
    }
    assert_eq!(seen.len(), 3);
    assert!(seen.contains(&"ou=remote,dc=x".to_string()));
}

#[test]
fn test_ignore_mode_treats_referrals_as_entries() {
    let (chain, _lut) = chain(ReferralMode::Ignore);
    let entry = chain.lookup(&dn("ou=remote,dc=x")).unwrap().unwrap();
    assert!(entry.is_referral());
    assert!(search_all(&chain, "ou=remote,dc=x", SearchScope::BaseObject).is_ok());
}

#[test]
fn test_follow_mode_is_unsupported() {
    let (chain, _lut) = chain(ReferralMode::Follow);
    assert!(matches!(
        chain.lookup(&dn("ou=remote,dc=x")),
        Err(LdapMuxError::Unsupported(_))
    ));
    assert!(matches!(
        search_all(&chain, "dc=x", SearchScope::WholeSubtree),
        Err(LdapMuxError::Unsupported(_))
    ));
}
