//! Structured payload decoding.
//!
//! Older rows carry payloads in the legacy application's native
//! serialization format (`a:2:{s:4:"name";s:3:"Bob";...}`); newer ones carry
//! JSON. [`sniff`] picks a decoder from the first bytes and [`decode_payload`]
//! always returns either a JSON value or `None`.

use serde_json::{Map, Number, Value};

/// Deepest array/object nesting the legacy decoder accepts (serde_json's limit).
const MAX_DEPTH: usize = 128;

/// A payload format that can be turned into JSON.
pub trait PayloadDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decode or give up. Never panics on malformed input.
    fn decode(&self, raw: &str) -> Option<Value>;
}

/// Decoder for the legacy serialization format.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacySerialized;

/// JSON, re-emitted as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPassthrough;

static LEGACY: LegacySerialized = LegacySerialized;
static JSON: JsonPassthrough = JsonPassthrough;

/// Pick a decoder from the payload's leading bytes.
pub fn sniff(raw: &str) -> Option<&'static dyn PayloadDecoder> {
    let legacy: &'static dyn PayloadDecoder = &LEGACY;
    let json: &'static dyn PayloadDecoder = &JSON;
    match raw.trim_start().as_bytes() {
        [] => None,
        [b'N', b';', ..] => Some(legacy),
        [b'a' | b's' | b'i' | b'd' | b'b' | b'O', b':', ..] => Some(legacy),
        _ => Some(json),
    }
}

/// Decode a payload into JSON; empty or undecodable input yields `None`.
pub fn decode_payload(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    sniff(raw)?.decode(raw)
}

// =============================================================================
// JSON
// =============================================================================

impl PayloadDecoder for JsonPassthrough {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        if let Ok(v) = serde_json::from_str(raw) {
            return Some(v);
        }
        // Exports that kept CSV quote doubling inside the field
        if raw.contains("\"\"") {
            return serde_json::from_str(&raw.replace("\"\"", "\"")).ok();
        }
        None
    }
}

// =============================================================================
// Legacy serialization
// =============================================================================

impl PayloadDecoder for LegacySerialized {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn decode(&self, raw: &str) -> Option<Value> {
        let mut reader = Reader { input: raw.trim().as_bytes(), pos: 0, depth: 0 };
        let value = reader.value()?;
        if reader.pos != reader.input.len() {
            return None;
        }
        Some(value)
    }
}

/// Cursor over the serialized bytes. String lengths are byte counts.
struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn value(&mut self) -> Option<Value> {
        let tag = self.byte()?;
        if tag == b'N' {
            self.expect(b';')?;
            return Some(Value::Null);
        }
        self.expect(b':')?;
        match tag {
            b'b' => {
                let v = self.until(b';')?;
                match v {
                    b"0" => Some(Value::Bool(false)),
                    b"1" => Some(Value::Bool(true)),
                    _ => None,
                }
            }
            b'i' => {
                let v = std::str::from_utf8(self.until(b';')?).ok()?;
                v.parse::<i64>().ok().map(Value::from)
            }
            b'd' => {
                let v = std::str::from_utf8(self.until(b';')?).ok()?;
                let f: f64 = v.parse().ok()?;
                // Non-finite floats have no JSON form
                Some(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
            }
            b's' => {
                let s = self.string()?;
                self.expect(b';')?;
                Some(Value::String(s))
            }
            b'a' => self.array(),
            b'O' => {
                // Class name is dropped; properties become an object
                self.string()?;
                self.expect(b':')?;
                let entries = self.entries()?;
                Some(Value::Object(
                    entries.into_iter().map(|(k, v)| (property_name(&k), v)).collect(),
                ))
            }
            _ => None,
        }
    }

    /// `a:<n>:{...}` - a list when keys are exactly 0..n, else an object.
    fn array(&mut self) -> Option<Value> {
        let entries = self.entries()?;
        let sequential = entries
            .iter()
            .enumerate()
            .all(|(i, (k, _))| *k == i.to_string());
        if sequential {
            Some(Value::Array(entries.into_iter().map(|(_, v)| v).collect()))
        } else {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(k, v);
            }
            Some(Value::Object(map))
        }
    }

    /// `<n>:{<key><value>...}` with integer or string keys.
    fn entries(&mut self) -> Option<Vec<(String, Value)>> {
        if self.depth >= MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let entries = self.entries_body();
        self.depth -= 1;
        entries
    }

    fn entries_body(&mut self) -> Option<Vec<(String, Value)>> {
        let count: usize = std::str::from_utf8(self.until(b':')?).ok()?.parse().ok()?;
        self.expect(b'{')?;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = match self.byte()? {
                b'i' => {
                    self.expect(b':')?;
                    std::str::from_utf8(self.until(b';')?).ok()?.parse::<i64>().ok()?.to_string()
                }
                b's' => {
                    self.expect(b':')?;
                    let k = self.string()?;
                    self.expect(b';')?;
                    k
                }
                _ => return None,
            };
            let value = self.value()?;
            entries.push((key, value));
        }
        self.expect(b'}')?;
        Some(entries)
    }

    /// `<len>:"<bytes>"`
    fn string(&mut self) -> Option<String> {
        let len: usize = std::str::from_utf8(self.until(b':')?).ok()?.parse().ok()?;
        self.expect(b'"')?;
        let input = self.input;
        let end = self.pos.checked_add(len)?;
        let bytes = input.get(self.pos..end)?;
        self.pos = end;
        self.expect(b'"')?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.input.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn expect(&mut self, want: u8) -> Option<()> {
        (self.byte()? == want).then_some(())
    }

    /// Bytes up to (not including) `stop`; consumes `stop`.
    fn until(&mut self, stop: u8) -> Option<&'a [u8]> {
        let input = self.input;
        let rest = &input[self.pos..];
        let idx = rest.iter().position(|&b| b == stop)?;
        self.pos += idx + 1;
        Some(&rest[..idx])
    }
}

/// Strip the visibility prefix of non-public properties (`\0*\0name`,
/// `\0Class\0name`).
fn property_name(raw: &str) -> String {
    match raw.strip_prefix('\0') {
        Some(rest) => rest.split_once('\0').map(|(_, name)| name).unwrap_or(rest).to_string(),
        None => raw.to_string(),
    }
}
