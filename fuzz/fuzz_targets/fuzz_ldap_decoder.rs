#![no_main]

use bytes::BytesMut;
use ldapmux::ldap::LdapCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    let mut codec = LdapCodec::new();

    // Drain every frame; malformed input must end in Ok(None) or Err, never a panic
    loop {
        match codec.decode(&mut buf) {
            Ok(Some(_msg)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
});
