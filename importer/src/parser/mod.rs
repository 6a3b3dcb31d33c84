//! CSV reader with encoding detection.
//!
//! Produces [`RawRow`]s one at a time. A file that is valid UTF-8 from
//! start to end is streamed; legacy single-byte exports (Latin-1,
//! Windows-1252) are detected on the whole content and decoded up front with
//! `encoding_rs`.
//!
//! Lines whose fields are all empty never surface as rows.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::error::{CsvError, CsvResult};

/// Block size of the UTF-8 pre-scan.
const SCAN_BLOCK: usize = 64 * 1024;

// =============================================================================
// Header & Rows
// =============================================================================

/// Column names of the input, with a name index.
#[derive(Debug, Clone)]
pub struct Header {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new(names: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // First occurrence wins on duplicate names
            index.entry(name.clone()).or_insert(i);
        }
        Self { names, index }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One data line paired with the header.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based physical line number of the record start
    pub line: u64,
    header: Arc<Header>,
    values: Vec<String>,
}

impl RawRow {
    pub fn new(line: u64, header: Arc<Header>, values: Vec<String>) -> Self {
        Self { line, header, values }
    }

    /// Raw value of a column. Absent columns give `None`; columns missing
    /// from a short row give `""`.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.header.position(column)?;
        Some(self.values.get(idx).map(String::as_str).unwrap_or(""))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    if std::str::from_utf8(bytes).is_ok() {
        return "utf-8".to_string();
    }
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        // Anything else that is not valid UTF-8: Windows-1252 maps every byte
        _ => "windows-1252".to_string(),
    }
}

/// Whether the whole input is valid UTF-8, read block by block.
///
/// A multi-byte sequence split across two blocks is carried over.
fn is_utf8_stream<R: Read>(mut input: R) -> std::io::Result<bool> {
    let mut buf = vec![0u8; SCAN_BLOCK];
    let mut carry = 0;
    loop {
        let n = input.read(&mut buf[carry..])?;
        if n == 0 {
            return Ok(carry == 0);
        }
        let filled = carry + n;
        match std::str::from_utf8(&buf[..filled]) {
            Ok(_) => carry = 0,
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                buf.copy_within(valid..filled, 0);
                carry = filled - valid;
            }
            Err(_) => return Ok(false),
        }
    }
}

/// Decode bytes to a string using the given encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> CsvResult<String> {
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8(bytes.to_vec())
            .map_err(|e| CsvError::Encoding(e.to_string())),
        "iso-8859-1" | "latin-1" | "latin1" => {
            Ok(encoding_rs::ISO_8859_15.decode_without_bom_handling(bytes).0.into_owned())
        }
        "windows-1252" | "cp1252" => Ok(encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()),
        other => Err(CsvError::Encoding(format!("unsupported encoding '{}'", other))),
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Options for opening a CSV source
#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

/// Streaming CSV source.
pub struct CsvSource {
    reader: csv::Reader<Box<dyn Read + Send>>,
    header: Arc<Header>,
    encoding: String,
    record: csv::StringRecord,
    blank_lines: u64,
    finished: bool,
}

impl std::fmt::Debug for CsvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSource")
            .field("header", &self.header.names())
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl CsvSource {
    /// Open a file, detect its encoding and read the header.
    pub fn open<P: AsRef<Path>>(path: P, options: CsvOptions) -> CsvResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CsvError::FileNotFound(path.to_path_buf()));
        }
        let mut file = File::open(path)?;

        let utf8 = is_utf8_stream(&mut file)?;
        file.seek(SeekFrom::Start(0))?;

        if utf8 {
            return Self::from_reader(Box::new(file), "utf-8".to_string(), options);
        }

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let encoding = detect_encoding(&bytes);
        let text = decode_content(&bytes, &encoding)?;
        Self::from_reader(Box::new(Cursor::new(text.into_bytes())), encoding, options)
    }

    /// Read from in-memory bytes.
    pub fn from_bytes(bytes: &[u8], options: CsvOptions) -> CsvResult<Self> {
        let encoding = detect_encoding(bytes);
        let text = if encoding == "utf-8" {
            bytes.to_vec()
        } else {
            decode_content(bytes, &encoding)?.into_bytes()
        };
        Self::from_reader(Box::new(Cursor::new(text)), encoding, options)
    }

    fn from_reader(
        input: Box<dyn Read + Send>,
        encoding: String,
        options: CsvOptions,
    ) -> CsvResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .quote(b'"')
            .double_quote(true)
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        let names: Vec<String> = reader
            .headers()
            .map_err(|_| CsvError::NoHeaders)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        if names.iter().all(|n| n.is_empty()) {
            return Err(CsvError::NoHeaders);
        }

        Ok(Self {
            reader,
            header: Arc::new(Header::new(names)),
            encoding,
            record: csv::StringRecord::new(),
            blank_lines: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Number of all-empty lines passed over so far.
    pub fn blank_lines(&self) -> u64 {
        self.blank_lines
    }

    /// Next non-blank row.
    ///
    /// `Err(CsvError::Malformed)` concerns one record and reading may go
    /// on. Any other error ends the stream.
    pub fn next_row(&mut self) -> Option<CsvResult<RawRow>> {
        if self.finished {
            return None;
        }
        loop {
            match self.reader.read_record(&mut self.record) {
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Ok(true) => {
                    let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                    if self.record.iter().all(|v| v.trim().is_empty()) {
                        self.blank_lines += 1;
                        continue;
                    }
                    if self.record.len() > self.header.len() {
                        return Some(Err(CsvError::Malformed {
                            line,
                            message: format!(
                                "{} fields, header has {}",
                                self.record.len(),
                                self.header.len()
                            ),
                        }));
                    }
                    let values = self.record.iter().map(str::to_string).collect();
                    return Some(Ok(RawRow::new(line, Arc::clone(&self.header), values)));
                }
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    if let csv::ErrorKind::Io(_) = e.kind() {
                        self.finished = true;
                        return Some(Err(CsvError::Io(std::io::Error::other(e.to_string()))));
                    }
                    return Some(Err(CsvError::Malformed { line, message: e.to_string() }));
                }
            }
        }
    }
}

impl Iterator for CsvSource {
    type Item = CsvResult<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rows(csv: &str) -> Vec<CsvResult<RawRow>> {
        CsvSource::from_bytes(csv.as_bytes(), CsvOptions::default())
            .unwrap()
            .collect()
    }

    #[test]
    fn test_simple_csv() {
        let rows = rows("name,age\nAlice,30\nBob,25");
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.get("name"), Some("Alice"));
        assert_eq!(first.get("age"), Some("30"));
    }

    #[test]
    fn test_quoted_values_with_escaped_quotes() {
        let rows = rows("name,payload\n\"Smith, J\",\"{\"\"a\"\":1}\"");
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.get("name"), Some("Smith, J"));
        assert_eq!(row.get("payload"), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut source = CsvSource::from_bytes(b"a,b\n1,2\n\n,\n  ,  \n3,4\n", CsvOptions::default())
            .unwrap();
        let collected: Vec<_> = source.by_ref().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(source.blank_lines(), 2);
    }

    #[test]
    fn test_short_row_pads_missing_columns() {
        let rows = rows("a,b,c\n1,2");
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.get("c"), Some(""));
        assert_eq!(row.get("nope"), None);
    }

    #[test]
    fn test_extra_columns_are_malformed() {
        let rows = rows("a,b\n1,2,3\n4,5");
        assert!(matches!(rows[0], Err(CsvError::Malformed { line: 2, .. })));
        assert!(rows[1].is_ok());
    }

    #[test]
    fn test_line_numbers() {
        let rows = rows("a\nx\ny");
        assert_eq!(rows[1].as_ref().unwrap().line, 3);
    }

    #[test]
    fn test_custom_delimiter() {
        let source = CsvSource::from_bytes(b"a;b\n1;2", CsvOptions { delimiter: b';' }).unwrap();
        let rows: Vec<_> = source.collect();
        assert_eq!(rows[0].as_ref().unwrap().get("b"), Some("2"));
    }

    #[test]
    fn test_bom_stripped_from_header() {
        let source = CsvSource::from_bytes("\u{feff}uuid,name\n1,x".as_bytes(), CsvOptions::default())
            .unwrap();
        assert!(source.header().contains("uuid"));
    }

    #[test]
    fn test_empty_input_has_no_header() {
        let err = CsvSource::from_bytes(b"", CsvOptions::default()).unwrap_err();
        assert!(matches!(err, CsvError::NoHeaders));
    }

    #[test]
    fn test_latin1_decoding() {
        // "name\nSociété" in ISO-8859-1
        let bytes: &[u8] = &[
            0x6E, 0x61, 0x6D, 0x65, 0x0A, 0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9,
        ];
        let source = CsvSource::from_bytes(bytes, CsvOptions::default()).unwrap();
        assert_ne!(source.encoding(), "utf-8");
        let rows: Vec<_> = source.collect();
        assert_eq!(rows[0].as_ref().unwrap().get("name"), Some("Société"));
    }

    /// ASCII rows filling more than one scan block, then a Latin-1 row.
    fn late_latin1() -> Vec<u8> {
        let mut bytes = b"company,city\n".to_vec();
        for i in 0..8000 {
            bytes.extend_from_slice(format!("Company {},Paris\n", i).as_bytes());
        }
        assert!(bytes.len() > SCAN_BLOCK);
        // "Société,Liège"
        bytes.extend_from_slice(&[
            0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9, 0x2C, 0x4C, 0x69, 0xE8, 0x67, 0x65, 0x0A,
        ]);
        bytes
    }

    #[test]
    fn test_latin1_after_first_block_is_decoded() {
        let source = CsvSource::from_bytes(&late_latin1(), CsvOptions::default()).unwrap();
        assert_ne!(source.encoding(), "utf-8");
        let rows: Vec<_> = source.collect();
        assert_eq!(rows.len(), 8001);
        let last = rows[8000].as_ref().unwrap();
        assert_eq!(last.get("company"), Some("Société"));
        assert_eq!(last.get("city"), Some("Liège"));
    }

    #[test]
    fn test_open_file_with_late_latin1() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&late_latin1()).unwrap();
        file.flush().unwrap();

        let source = CsvSource::open(file.path(), CsvOptions::default()).unwrap();
        assert_ne!(source.encoding(), "utf-8");
        let rows: Vec<_> = source.collect();
        assert!(rows.iter().all(|r| r.is_ok()));
        assert_eq!(rows[8000].as_ref().unwrap().get("city"), Some("Liège"));
    }

    #[test]
    fn test_utf8_scan_handles_split_sequences() {
        // A two-byte "é" straddling the block boundary
        let mut bytes = vec![b'a'; SCAN_BLOCK - 1];
        bytes.extend_from_slice("é".as_bytes());
        assert!(is_utf8_stream(Cursor::new(&bytes)).unwrap());

        bytes.push(0xE9);
        assert!(!is_utf8_stream(Cursor::new(&bytes)).unwrap());

        // Truncated sequence at end of input
        let truncated = [b'a', 0xC3];
        assert!(!is_utf8_stream(Cursor::new(&truncated[..])).unwrap());
    }

    #[test]
    fn test_open_missing_file() {
        let err = CsvSource::open("/definitely/not/here.csv", CsvOptions::default()).unwrap_err();
        assert!(matches!(err, CsvError::FileNotFound(_)));
    }

    #[test]
    fn test_open_file_streams_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "uuid,email").unwrap();
        writeln!(file, "a,one@example.com").unwrap();
        let source = CsvSource::open(file.path(), CsvOptions::default()).unwrap();
        assert_eq!(source.encoding(), "utf-8");
        assert_eq!(source.count(), 1);
    }
}
