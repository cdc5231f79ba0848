// BER encoding of LDAPv3 messages (RFC 4511 section 4)

use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

use super::filters::{ExtensibleFilter, LdapFilter, SubstringFilter};
use super::protocol::*;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_ENUMERATED: u8 = 0x0a;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

const LDAP_BIND_REQUEST: u8 = 0x60;
const LDAP_BIND_RESPONSE: u8 = 0x61;
const LDAP_UNBIND_REQUEST: u8 = 0x42;
const LDAP_SEARCH_REQUEST: u8 = 0x63;
const LDAP_SEARCH_RESULT_ENTRY: u8 = 0x64;
const LDAP_SEARCH_RESULT_DONE: u8 = 0x65;
const LDAP_SEARCH_RESULT_REFERENCE: u8 = 0x73;
const LDAP_ABANDON_REQUEST: u8 = 0x50;
const LDAP_EXTENDED_RESPONSE: u8 = 0x78;
const LDAP_INTERMEDIATE_RESPONSE: u8 = 0x79;

const AUTH_SIMPLE: u8 = 0x80;
const AUTH_SASL: u8 = 0xa3;
const RESULT_REFERRAL: u8 = 0xa3;
const BIND_SERVER_SASL_CREDS: u8 = 0x87;
const EXTENDED_RESPONSE_NAME: u8 = 0x8a;
const EXTENDED_RESPONSE_VALUE: u8 = 0x8b;
const INTERMEDIATE_NAME: u8 = 0x80;
const INTERMEDIATE_VALUE: u8 = 0x81;
const CONTROLS: u8 = 0xa0;

const FILTER_AND: u8 = 0xa0;
const FILTER_OR: u8 = 0xa1;
const FILTER_NOT: u8 = 0xa2;
const FILTER_EQUALITY: u8 = 0xa3;
const FILTER_SUBSTRINGS: u8 = 0xa4;
const FILTER_GREATER_OR_EQUAL: u8 = 0xa5;
const FILTER_LESS_OR_EQUAL: u8 = 0xa6;
const FILTER_PRESENT: u8 = 0x87;
const FILTER_APPROXIMATE: u8 = 0xa8;
const FILTER_EXTENSIBLE: u8 = 0xa9;

const SUBSTRING_INITIAL: u8 = 0x80;
const SUBSTRING_ANY: u8 = 0x81;
const SUBSTRING_FINAL: u8 = 0x82;

const MATCHING_RULE: u8 = 0x81;
const MATCHING_TYPE: u8 = 0x82;
const MATCHING_VALUE: u8 = 0x83;
const MATCHING_DN_ATTRIBUTES: u8 = 0x84;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Frames LDAP messages on a byte stream.
///
/// A frame with a bad outer tag or an unusable length is fatal for the
/// stream. A frame whose content can't be parsed is logged and skipped,
/// so one malformed response does not take the connection down.
pub struct LdapCodec {
    max_message_size: usize,
}

impl LdapCodec {
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Total length of the frame at the head of `src`, or `None` when more
    /// bytes are needed to tell.
    fn frame_length(&self, src: &BytesMut) -> io::Result<Option<usize>> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != TAG_SEQUENCE {
            return Err(invalid(format!(
                "Expected SEQUENCE, found tag 0x{:02x}",
                src[0]
            )));
        }
        if src.len() < 2 {
            return Ok(None);
        }

        let (length, header_len) = if src[1] & 0x80 == 0 {
            (src[1] as usize, 2)
        } else {
            let num_octets = (src[1] & 0x7f) as usize;
            if num_octets == 0 {
                return Err(invalid("Indefinite length encoding is not allowed"));
            }
            if num_octets > 4 {
                return Err(invalid(format!("Length uses {} octets", num_octets)));
            }
            if src.len() < 2 + num_octets {
                return Ok(None);
            }
            let length = src[2..2 + num_octets]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (length, 2 + num_octets)
        };

        if length > self.max_message_size {
            return Err(invalid(format!(
                "Message of {} bytes exceeds the {} byte limit",
                length, self.max_message_size
            )));
        }

        Ok(Some(header_len + length))
    }
}

impl Default for LdapCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LdapCodec {
    type Item = LdapMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let total_len = match self.frame_length(src)? {
                Some(total_len) => total_len,
                None => return Ok(None),
            };
            if src.len() < total_len {
                src.reserve(total_len - src.len());
                return Ok(None);
            }

            let frame = src.split_to(total_len);
            match decode_message(&frame) {
                Ok(message) => {
                    trace!(
                        "Decoded LDAP message: id={}, op={}",
                        message.message_id,
                        message.protocol_op.name()
                    );
                    return Ok(Some(message));
                }
                Err(e) => {
                    warn!("Skipping undecodable LDAP message of {} bytes: {}", total_len, e);
                }
            }
        }
    }
}

impl Encoder<LdapMessage> for LdapCodec {
    type Error = io::Error;

    fn encode(&mut self, item: LdapMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.message_id > MAX_MESSAGE_ID {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Message id {} is out of range", item.message_id),
            ));
        }

        let mut content = BytesMut::new();
        put_integer(&mut content, TAG_INTEGER, item.message_id as i64);
        encode_op(&mut content, &item.protocol_op);
        if !item.controls.is_empty() {
            put_constructed(&mut content, CONTROLS, |buf| {
                for control in &item.controls {
                    put_constructed(buf, TAG_SEQUENCE, |buf| {
                        put_octets(buf, TAG_OCTET_STRING, control.oid.as_bytes());
                        if control.criticality {
                            put_bool(buf, TAG_BOOLEAN, true);
                        }
                        if let Some(value) = &control.value {
                            put_octets(buf, TAG_OCTET_STRING, value);
                        }
                    });
                }
            });
        }

        dst.reserve(content.len() + 6);
        put_tlv(dst, TAG_SEQUENCE, &content);
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

// ---- encoding ----

fn put_length(buf: &mut BytesMut, length: usize) {
    if length < 128 {
        buf.put_u8(length as u8);
    } else if length < 256 {
        buf.put_u8(0x81);
        buf.put_u8(length as u8);
    } else if length < 65536 {
        buf.put_u8(0x82);
        buf.put_u16(length as u16);
    } else if length < (1 << 24) {
        buf.put_u8(0x83);
        buf.put_u8((length >> 16) as u8);
        buf.put_u16(length as u16);
    } else {
        buf.put_u8(0x84);
        buf.put_u32(length as u32);
    }
}

fn put_tlv(buf: &mut BytesMut, tag: u8, content: &[u8]) {
    buf.put_u8(tag);
    put_length(buf, content.len());
    buf.put_slice(content);
}

fn put_constructed(buf: &mut BytesMut, tag: u8, build: impl FnOnce(&mut BytesMut)) {
    let mut inner = BytesMut::new();
    build(&mut inner);
    put_tlv(buf, tag, &inner);
}

fn put_octets(buf: &mut BytesMut, tag: u8, value: &[u8]) {
    put_tlv(buf, tag, value);
}

fn put_bool(buf: &mut BytesMut, tag: u8, value: bool) {
    put_tlv(buf, tag, &[if value { 0xff } else { 0x00 }]);
}

/// Minimal two's-complement content octets for `value`.
fn integer_octets(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ones = bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0;
        if !(redundant_zero || redundant_ones) {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn put_integer(buf: &mut BytesMut, tag: u8, value: i64) {
    put_tlv(buf, tag, &integer_octets(value));
}

fn put_result(buf: &mut BytesMut, result: &LdapResult) {
    put_integer(buf, TAG_ENUMERATED, result.result_code as i64);
    put_octets(buf, TAG_OCTET_STRING, result.matched_dn.as_bytes());
    put_octets(buf, TAG_OCTET_STRING, result.diagnostic_message.as_bytes());
    if !result.referrals.is_empty() {
        put_constructed(buf, RESULT_REFERRAL, |buf| {
            for url in &result.referrals {
                put_octets(buf, TAG_OCTET_STRING, url.as_bytes());
            }
        });
    }
}

fn encode_op(buf: &mut BytesMut, op: &LdapProtocolOp) {
    match op {
        LdapProtocolOp::BindRequest {
            version,
            dn,
            authentication,
        } => put_constructed(buf, LDAP_BIND_REQUEST, |buf| {
            put_integer(buf, TAG_INTEGER, *version as i64);
            put_octets(buf, TAG_OCTET_STRING, dn.as_bytes());
            match authentication {
                BindAuthentication::Simple(password) => {
                    put_octets(buf, AUTH_SIMPLE, password.as_bytes())
                }
                BindAuthentication::Sasl {
                    mechanism,
                    credentials,
                } => put_constructed(buf, AUTH_SASL, |buf| {
                    put_octets(buf, TAG_OCTET_STRING, mechanism.as_bytes());
                    if let Some(credentials) = credentials {
                        put_octets(buf, TAG_OCTET_STRING, credentials);
                    }
                }),
            }
        }),

        LdapProtocolOp::BindResponse {
            result,
            server_sasl_creds,
        } => put_constructed(buf, LDAP_BIND_RESPONSE, |buf| {
            put_result(buf, result);
            if let Some(creds) = server_sasl_creds {
                put_octets(buf, BIND_SERVER_SASL_CREDS, creds);
            }
        }),

        LdapProtocolOp::UnbindRequest => put_tlv(buf, LDAP_UNBIND_REQUEST, &[]),

        LdapProtocolOp::SearchRequest {
            base_dn,
            scope,
            deref_aliases,
            size_limit,
            time_limit,
            types_only,
            filter,
            attributes,
        } => put_constructed(buf, LDAP_SEARCH_REQUEST, |buf| {
            put_octets(buf, TAG_OCTET_STRING, base_dn.as_bytes());
            put_integer(buf, TAG_ENUMERATED, *scope as i64);
            put_integer(buf, TAG_ENUMERATED, *deref_aliases as i64);
            put_integer(buf, TAG_INTEGER, *size_limit as i64);
            put_integer(buf, TAG_INTEGER, *time_limit as i64);
            put_bool(buf, TAG_BOOLEAN, *types_only);
            encode_filter(buf, filter);
            put_constructed(buf, TAG_SEQUENCE, |buf| {
                for attribute in attributes {
                    put_octets(buf, TAG_OCTET_STRING, attribute.as_bytes());
                }
            });
        }),

        LdapProtocolOp::SearchResultEntry { dn, attributes } => {
            put_constructed(buf, LDAP_SEARCH_RESULT_ENTRY, |buf| {
                put_octets(buf, TAG_OCTET_STRING, dn.as_bytes());
                let mut names: Vec<&String> = attributes.keys().collect();
                names.sort();
                put_constructed(buf, TAG_SEQUENCE, |buf| {
                    for name in names {
                        put_constructed(buf, TAG_SEQUENCE, |buf| {
                            put_octets(buf, TAG_OCTET_STRING, name.as_bytes());
                            put_constructed(buf, TAG_SET, |buf| {
                                for value in &attributes[name] {
                                    put_octets(buf, TAG_OCTET_STRING, value.as_bytes());
                                }
                            });
                        });
                    }
                });
            })
        }

        LdapProtocolOp::SearchResultReference { urls } => {
            put_constructed(buf, LDAP_SEARCH_RESULT_REFERENCE, |buf| {
                for url in urls {
                    put_octets(buf, TAG_OCTET_STRING, url.as_bytes());
                }
            })
        }

        LdapProtocolOp::SearchResultDone { result } => {
            put_constructed(buf, LDAP_SEARCH_RESULT_DONE, |buf| put_result(buf, result))
        }

        LdapProtocolOp::AbandonRequest { message_id } => {
            put_integer(buf, LDAP_ABANDON_REQUEST, *message_id as i64)
        }

        LdapProtocolOp::ExtendedResponse {
            result,
            name,
            value,
        } => put_constructed(buf, LDAP_EXTENDED_RESPONSE, |buf| {
            put_result(buf, result);
            if let Some(name) = name {
                put_octets(buf, EXTENDED_RESPONSE_NAME, name.as_bytes());
            }
            if let Some(value) = value {
                put_octets(buf, EXTENDED_RESPONSE_VALUE, value);
            }
        }),

        LdapProtocolOp::IntermediateResponse { name, value } => {
            put_constructed(buf, LDAP_INTERMEDIATE_RESPONSE, |buf| {
                if let Some(name) = name {
                    put_octets(buf, INTERMEDIATE_NAME, name.as_bytes());
                }
                if let Some(value) = value {
                    put_octets(buf, INTERMEDIATE_VALUE, value);
                }
            })
        }
    }
}

fn put_assertion(buf: &mut BytesMut, tag: u8, attr: &str, value: &str) {
    put_constructed(buf, tag, |buf| {
        put_octets(buf, TAG_OCTET_STRING, attr.as_bytes());
        put_octets(buf, TAG_OCTET_STRING, value.as_bytes());
    });
}

fn encode_filter(buf: &mut BytesMut, filter: &LdapFilter) {
    match filter {
        LdapFilter::And(filters) => put_constructed(buf, FILTER_AND, |buf| {
            filters.iter().for_each(|f| encode_filter(buf, f))
        }),
        LdapFilter::Or(filters) => put_constructed(buf, FILTER_OR, |buf| {
            filters.iter().for_each(|f| encode_filter(buf, f))
        }),
        LdapFilter::Not(inner) => put_constructed(buf, FILTER_NOT, |buf| encode_filter(buf, inner)),
        LdapFilter::Equality(attr, value) => put_assertion(buf, FILTER_EQUALITY, attr, value),
        LdapFilter::GreaterOrEqual(attr, value) => {
            put_assertion(buf, FILTER_GREATER_OR_EQUAL, attr, value)
        }
        LdapFilter::LessOrEqual(attr, value) => put_assertion(buf, FILTER_LESS_OR_EQUAL, attr, value),
        LdapFilter::Approximate(attr, value) => put_assertion(buf, FILTER_APPROXIMATE, attr, value),
        LdapFilter::Present(attr) => put_octets(buf, FILTER_PRESENT, attr.as_bytes()),
        LdapFilter::Substring(attr, substring) => put_constructed(buf, FILTER_SUBSTRINGS, |buf| {
            put_octets(buf, TAG_OCTET_STRING, attr.as_bytes());
            put_constructed(buf, TAG_SEQUENCE, |buf| {
                if let Some(initial) = &substring.initial {
                    put_octets(buf, SUBSTRING_INITIAL, initial.as_bytes());
                }
                for any in &substring.any {
                    put_octets(buf, SUBSTRING_ANY, any.as_bytes());
                }
                if let Some(final_) = &substring.final_ {
                    put_octets(buf, SUBSTRING_FINAL, final_.as_bytes());
                }
            });
        }),
        LdapFilter::Extensible(ext) => put_constructed(buf, FILTER_EXTENSIBLE, |buf| {
            if let Some(rule) = &ext.matching_rule {
                put_octets(buf, MATCHING_RULE, rule.as_bytes());
            }
            if let Some(attr) = &ext.attribute {
                put_octets(buf, MATCHING_TYPE, attr.as_bytes());
            }
            put_octets(buf, MATCHING_VALUE, ext.value.as_bytes());
            if ext.dn_attributes {
                put_bool(buf, MATCHING_DN_ATTRIBUTES, true);
            }
        }),
    }
}

// ---- decoding ----

struct BerReader<'a> {
    data: &'a [u8],
}

impl<'a> BerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn peek_tag(&self) -> Option<u8> {
        self.data.first().copied()
    }

    fn read_tlv(&mut self) -> io::Result<(u8, &'a [u8])> {
        let mut data = self.data;
        if data.remaining() < 2 {
            return Err(invalid("Truncated element"));
        }
        let tag = data.get_u8();
        let first = data.get_u8();
        let length = if first & 0x80 == 0 {
            first as usize
        } else {
            let num_octets = (first & 0x7f) as usize;
            if num_octets == 0 || num_octets > 4 || data.remaining() < num_octets {
                return Err(invalid("Invalid length encoding"));
            }
            (0..num_octets).fold(0usize, |acc, _| (acc << 8) | data.get_u8() as usize)
        };
        if data.remaining() < length {
            return Err(invalid(format!(
                "Element 0x{:02x} needs {} bytes, {} left",
                tag,
                length,
                data.remaining()
            )));
        }
        let (content, rest) = data.split_at(length);
        self.data = rest;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> io::Result<&'a [u8]> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(invalid(format!(
                "Expected tag 0x{:02x}, found 0x{:02x}",
                expected, tag
            )));
        }
        Ok(content)
    }

    fn optional(&mut self, tag: u8) -> io::Result<Option<&'a [u8]>> {
        if self.peek_tag() == Some(tag) {
            self.expect(tag).map(Some)
        } else {
            Ok(None)
        }
    }

    fn read_integer(&mut self, tag: u8) -> io::Result<i64> {
        integer_value(self.expect(tag)?)
    }

    fn read_u32(&mut self, tag: u8) -> io::Result<u32> {
        let value = self.read_integer(tag)?;
        u32::try_from(value).map_err(|_| invalid(format!("Integer {} is out of range", value)))
    }

    fn read_bool(&mut self, tag: u8) -> io::Result<bool> {
        match self.expect(tag)? {
            [byte] => Ok(*byte != 0),
            _ => Err(invalid("BOOLEAN must be one octet")),
        }
    }

    fn read_string(&mut self, tag: u8) -> io::Result<String> {
        utf8(self.expect(tag)?)
    }
}

fn integer_value(content: &[u8]) -> io::Result<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(invalid(format!("INTEGER of {} octets", content.len())));
    }
    let initial: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(initial, |acc, b| (acc << 8) | *b as i64))
}

fn utf8(bytes: &[u8]) -> io::Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| invalid("Invalid UTF-8"))
}

fn decode_message(frame: &[u8]) -> io::Result<LdapMessage> {
    let body = BerReader::new(frame).expect(TAG_SEQUENCE)?;
    let mut reader = BerReader::new(body);

    let message_id = reader.read_u32(TAG_INTEGER)?;
    if message_id > MAX_MESSAGE_ID {
        return Err(invalid(format!("Message id {} is out of range", message_id)));
    }

    let (op_tag, op_content) = reader.read_tlv()?;
    let protocol_op = decode_op(op_tag, op_content)?;

    let controls = match reader.optional(CONTROLS)? {
        Some(content) => decode_controls(content)?,
        None => Vec::new(),
    };

    Ok(LdapMessage {
        message_id,
        protocol_op,
        controls,
    })
}

fn decode_controls(content: &[u8]) -> io::Result<Vec<Control>> {
    let mut reader = BerReader::new(content);
    let mut controls = Vec::new();
    while !reader.is_empty() {
        let mut control = BerReader::new(reader.expect(TAG_SEQUENCE)?);
        let oid = control.read_string(TAG_OCTET_STRING)?;
        let criticality = match control.peek_tag() {
            Some(TAG_BOOLEAN) => control.read_bool(TAG_BOOLEAN)?,
            _ => false,
        };
        let value = control.optional(TAG_OCTET_STRING)?.map(<[u8]>::to_vec);
        controls.push(Control {
            oid,
            criticality,
            value,
        });
    }
    Ok(controls)
}

fn decode_result(reader: &mut BerReader<'_>) -> io::Result<LdapResult> {
    let code = reader.read_integer(TAG_ENUMERATED)?;
    let result_code = u32::try_from(code)
        .map(LdapResultCode::from_code)
        .unwrap_or(LdapResultCode::Other);
    let matched_dn = reader.read_string(TAG_OCTET_STRING)?;
    let diagnostic_message = reader.read_string(TAG_OCTET_STRING)?;
    let referrals = match reader.optional(RESULT_REFERRAL)? {
        Some(content) => read_strings(content)?,
        None => Vec::new(),
    };
    Ok(LdapResult {
        result_code,
        matched_dn,
        diagnostic_message,
        referrals,
    })
}

fn read_strings(content: &[u8]) -> io::Result<Vec<String>> {
    let mut reader = BerReader::new(content);
    let mut values = Vec::new();
    while !reader.is_empty() {
        values.push(reader.read_string(TAG_OCTET_STRING)?);
    }
    Ok(values)
}

fn decode_op(tag: u8, content: &[u8]) -> io::Result<LdapProtocolOp> {
    let mut reader = BerReader::new(content);

    let op = match tag {
        LDAP_BIND_REQUEST => {
            let version = reader.read_u32(TAG_INTEGER)?;
            let version = u8::try_from(version)
                .map_err(|_| invalid(format!("Bind version {} is out of range", version)))?;
            let dn = reader.read_string(TAG_OCTET_STRING)?;
            let (auth_tag, auth) = reader.read_tlv()?;
            let authentication = match auth_tag {
                AUTH_SIMPLE => BindAuthentication::Simple(utf8(auth)?),
                AUTH_SASL => {
                    let mut sasl = BerReader::new(auth);
                    let mechanism = sasl.read_string(TAG_OCTET_STRING)?;
                    let credentials = sasl.optional(TAG_OCTET_STRING)?.map(<[u8]>::to_vec);
                    BindAuthentication::Sasl {
                        mechanism,
                        credentials,
                    }
                }
                other => {
                    return Err(invalid(format!(
                        "Unsupported authentication choice 0x{:02x}",
                        other
                    )))
                }
            };
            LdapProtocolOp::BindRequest {
                version,
                dn,
                authentication,
            }
        }

        LDAP_BIND_RESPONSE => {
            let result = decode_result(&mut reader)?;
            let server_sasl_creds = reader.optional(BIND_SERVER_SASL_CREDS)?.map(<[u8]>::to_vec);
            LdapProtocolOp::BindResponse {
                result,
                server_sasl_creds,
            }
        }

        LDAP_UNBIND_REQUEST => LdapProtocolOp::UnbindRequest,

        LDAP_SEARCH_REQUEST => {
            let base_dn = reader.read_string(TAG_OCTET_STRING)?;
            let scope = SearchScope::from_code(reader.read_u32(TAG_ENUMERATED)?)
                .ok_or_else(|| invalid("Unknown search scope"))?;
            let deref_aliases = DerefAliases::from_code(reader.read_u32(TAG_ENUMERATED)?)
                .ok_or_else(|| invalid("Unknown alias dereferencing mode"))?;
            let size_limit = reader.read_u32(TAG_INTEGER)?;
            let time_limit = reader.read_u32(TAG_INTEGER)?;
            let types_only = reader.read_bool(TAG_BOOLEAN)?;
            let (filter_tag, filter_content) = reader.read_tlv()?;
            let filter = decode_filter(filter_tag, filter_content)?;
            let attributes = read_strings(reader.expect(TAG_SEQUENCE)?)?;
            LdapProtocolOp::SearchRequest {
                base_dn,
                scope,
                deref_aliases,
                size_limit,
                time_limit,
                types_only,
                filter,
                attributes,
            }
        }

        LDAP_SEARCH_RESULT_ENTRY => {
            let dn = reader.read_string(TAG_OCTET_STRING)?;
            let mut list = BerReader::new(reader.expect(TAG_SEQUENCE)?);
            let mut attributes = HashMap::new();
            while !list.is_empty() {
                let mut attribute = BerReader::new(list.expect(TAG_SEQUENCE)?);
                let name = attribute.read_string(TAG_OCTET_STRING)?;
                let values = read_strings(attribute.expect(TAG_SET)?)?;
                attributes
                    .entry(name)
                    .or_insert_with(Vec::new)
                    .extend(values);
            }
            LdapProtocolOp::SearchResultEntry { dn, attributes }
        }

        LDAP_SEARCH_RESULT_REFERENCE => LdapProtocolOp::SearchResultReference {
            urls: read_strings(content)?,
        },

        LDAP_SEARCH_RESULT_DONE => LdapProtocolOp::SearchResultDone {
            result: decode_result(&mut reader)?,
        },

        LDAP_ABANDON_REQUEST => {
            let message_id = u32::try_from(integer_value(content)?)
                .map_err(|_| invalid("Abandoned message id is out of range"))?;
            return Ok(LdapProtocolOp::AbandonRequest { message_id });
        }

        LDAP_EXTENDED_RESPONSE => {
            let result = decode_result(&mut reader)?;
            let name = reader.optional(EXTENDED_RESPONSE_NAME)?.map(utf8).transpose()?;
            let value = reader.optional(EXTENDED_RESPONSE_VALUE)?.map(<[u8]>::to_vec);
            LdapProtocolOp::ExtendedResponse {
                result,
                name,
                value,
            }
        }

        LDAP_INTERMEDIATE_RESPONSE => {
            let name = reader.optional(INTERMEDIATE_NAME)?.map(utf8).transpose()?;
            let value = reader.optional(INTERMEDIATE_VALUE)?.map(<[u8]>::to_vec);
            LdapProtocolOp::IntermediateResponse { name, value }
        }

        other => {
            return Err(invalid(format!("Unsupported operation tag: 0x{:02x}", other)));
        }
    };

    Ok(op)
}

fn decode_assertion(content: &[u8]) -> io::Result<(String, String)> {
    let mut reader = BerReader::new(content);
    let attr = reader.read_string(TAG_OCTET_STRING)?;
    let value = reader.read_string(TAG_OCTET_STRING)?;
    Ok((attr, value))
}

fn decode_filter_set(content: &[u8]) -> io::Result<Vec<LdapFilter>> {
    let mut reader = BerReader::new(content);
    let mut filters = Vec::new();
    while !reader.is_empty() {
        let (tag, inner) = reader.read_tlv()?;
        filters.push(decode_filter(tag, inner)?);
    }
    Ok(filters)
}

fn decode_filter(tag: u8, content: &[u8]) -> io::Result<LdapFilter> {
    let filter = match tag {
        FILTER_AND => LdapFilter::And(decode_filter_set(content)?),
        FILTER_OR => LdapFilter::Or(decode_filter_set(content)?),
        FILTER_NOT => {
            let mut reader = BerReader::new(content);
            let (inner_tag, inner) = reader.read_tlv()?;
            LdapFilter::Not(Box::new(decode_filter(inner_tag, inner)?))
        }
        FILTER_EQUALITY => {
            let (attr, value) = decode_assertion(content)?;
            LdapFilter::Equality(attr, value)
        }
        FILTER_GREATER_OR_EQUAL => {
            let (attr, value) = decode_assertion(content)?;
            LdapFilter::GreaterOrEqual(attr, value)
        }
        FILTER_LESS_OR_EQUAL => {
            let (attr, value) = decode_assertion(content)?;
            LdapFilter::LessOrEqual(attr, value)
        }
        FILTER_APPROXIMATE => {
            let (attr, value) = decode_assertion(content)?;
            LdapFilter::Approximate(attr, value)
        }
        FILTER_PRESENT => LdapFilter::Present(utf8(content)?),
        FILTER_SUBSTRINGS => {
            let mut reader = BerReader::new(content);
            let attr = reader.read_string(TAG_OCTET_STRING)?;
            let mut parts = BerReader::new(reader.expect(TAG_SEQUENCE)?);
            let mut substring = SubstringFilter {
                initial: None,
                any: Vec::new(),
                final_: None,
            };
            while !parts.is_empty() {
                let (part_tag, part) = parts.read_tlv()?;
                match part_tag {
                    SUBSTRING_INITIAL => substring.initial = Some(utf8(part)?),
                    SUBSTRING_ANY => substring.any.push(utf8(part)?),
                    SUBSTRING_FINAL => substring.final_ = Some(utf8(part)?),
                    other => {
                        return Err(invalid(format!("Unknown substring choice 0x{:02x}", other)))
                    }
                }
            }
            LdapFilter::Substring(attr, substring)
        }
        FILTER_EXTENSIBLE => {
            let mut reader = BerReader::new(content);
            let matching_rule = reader.optional(MATCHING_RULE)?.map(utf8).transpose()?;
            let attribute = reader.optional(MATCHING_TYPE)?.map(utf8).transpose()?;
            let value = reader.read_string(MATCHING_VALUE)?;
            let dn_attributes = match reader.peek_tag() {
                Some(MATCHING_DN_ATTRIBUTES) => reader.read_bool(MATCHING_DN_ATTRIBUTES)?,
                _ => false,
            };
            LdapFilter::Extensible(ExtensibleFilter {
                attribute,
                matching_rule,
                value,
                dn_attributes,
            })
        }
        other => return Err(invalid(format!("Unknown filter choice 0x{:02x}", other))),
    };
    Ok(filter)
}
