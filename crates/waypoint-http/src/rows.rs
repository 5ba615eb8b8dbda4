use crate::Error;
use bytes::{Bytes, BytesMut};

/// Incrementally splits the elements of a single top-level JSON array out of
/// a streaming HTTP response body, without buffering the whole document.
/// Used for the `results`/`hits` arrays the query, analytics, and search
/// services return.
pub struct RowReader {
    response: Option<reqwest::Response>,
    rows_field: &'static str,
    buf: BytesMut,
    state: State,
}

enum State {
    /// Still looking for `"<rows_field>":[` in the buffered prefix.
    SeekingArrayStart,
    /// Inside the array, scanning for the next element or its close.
    InArray,
    /// Array closed; everything delivered via [`RowReader::meta_data`] from
    /// here on is whatever of the enclosing object followed it.
    Done,
}

impl RowReader {
    pub(crate) fn new(response: reqwest::Response, rows_field: &'static str) -> Self {
        RowReader {
            response: Some(response),
            rows_field,
            buf: BytesMut::new(),
            state: State::SeekingArrayStart,
        }
    }

    /// Returns the next row's raw JSON bytes, or `None` once the array is
    /// exhausted. Must not be called again after returning `None`.
    pub async fn next_row(&mut self) -> Result<Option<Bytes>, Error> {
        loop {
            match self.state {
                State::SeekingArrayStart => {
                    if let Some(start) = find_array_start(&self.buf, self.rows_field) {
                        self.buf.advance_to(start);
                        self.state = State::InArray;
                    } else if !self.pull_more().await? {
                        return Err(Error::MalformedBody(format!(
                            "stream ended before finding field {:?}",
                            self.rows_field
                        )));
                    }
                }
                State::InArray => {
                    match scan_next_element(&self.buf) {
                        ScanResult::Element { end, consumed } => {
                            let row = self.buf.split_to(end).freeze();
                            self.buf.advance_to(consumed - end);
                            return Ok(Some(row));
                        }
                        ScanResult::ArrayEnd { consumed } => {
                            self.buf.advance_to(consumed);
                            self.state = State::Done;
                            return Ok(None);
                        }
                        ScanResult::NeedMoreData => {
                            if !self.pull_more().await? {
                                return Err(Error::MalformedBody(
                                    "stream ended mid-array".to_string(),
                                ));
                            }
                        }
                    }
                }
                State::Done => return Ok(None),
            }
        }
    }

    /// Drains and returns whatever trailed the rows array (the rest of the
    /// enclosing JSON object: `status`, `metrics`, `errors`, ...). Call only
    /// after [`RowReader::next_row`] has returned `None`.
    pub async fn meta_data(mut self) -> Result<Bytes, Error> {
        while self.pull_more().await? {}
        Ok(self.buf.freeze())
    }

    async fn pull_more(&mut self) -> Result<bool, Error> {
        let Some(response) = self.response.as_mut() else {
            return Ok(false);
        };
        match response.chunk().await? {
            Some(chunk) => {
                self.buf.extend_from_slice(&chunk);
                Ok(true)
            }
            None => {
                self.response = None;
                Ok(false)
            }
        }
    }
}

trait BytesMutAdvance {
    fn advance_to(&mut self, skip: usize);
}

impl BytesMutAdvance for BytesMut {
    fn advance_to(&mut self, skip: usize) {
        let _ = self.split_to(skip.min(self.len()));
    }
}

fn find_array_start(buf: &[u8], field: &str) -> Option<usize> {
    let needle = format!("\"{field}\"");
    let pos = find_subslice(buf, needle.as_bytes())?;
    let mut i = pos + needle.len();
    while i < buf.len() && buf[i].is_ascii_whitespace() {
        i += 1;
    }
    if buf.get(i) != Some(&b':') {
        return None;
    }
    i += 1;
    while i < buf.len() && buf[i].is_ascii_whitespace() {
        i += 1;
    }
    if buf.get(i) != Some(&b'[') {
        return None;
    }
    Some(i + 1)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

enum ScanResult {
    /// A complete element occupies `buf[..end]`; `consumed` also accounts for
    /// a trailing comma or whitespace that should be dropped before the next
    /// scan.
    Element { end: usize, consumed: usize },
    ArrayEnd { consumed: usize },
    NeedMoreData,
}

/// Scans `buf` (positioned just inside a JSON array, after `[` or a previous
/// element's separator) for the next element or the array's closing `]`.
fn scan_next_element(buf: &[u8]) -> ScanResult {
    let mut i = 0;
    while i < buf.len() && buf[i].is_ascii_whitespace() {
        i += 1;
    }
    match buf.get(i) {
        None => ScanResult::NeedMoreData,
        Some(b']') => ScanResult::ArrayEnd { consumed: i + 1 },
        Some(_) => {
            let mut depth = 0i32;
            let mut in_string = false;
            let mut escape = false;

            while i < buf.len() {
                let byte = buf[i];
                if in_string {
                    if escape {
                        escape = false;
                    } else if byte == b'\\' {
                        escape = true;
                    } else if byte == b'"' {
                        in_string = false;
                    }
                } else {
                    match byte {
                        b'"' => in_string = true,
                        b'{' | b'[' => depth += 1,
                        b'}' | b']' => {
                            depth -= 1;
                            if depth < 0 {
                                // We hit the array's own closing bracket
                                // without a nested-structure imbalance: the
                                // element ended just before this byte.
                                return ScanResult::Element {
                                    end: i,
                                    consumed: i,
                                };
                            }
                        }
                        b',' if depth == 0 => {
                            return ScanResult::Element {
                                end: i,
                                consumed: i + 1,
                            };
                        }
                        _ => {}
                    }
                }
                i += 1;
            }
            ScanResult::NeedMoreData
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_array_start_after_field_name() {
        let buf = br#"{"results":[{"a":1},{"a":2}],"status":"success"}"#;
        let start = find_array_start(buf, "results").unwrap();
        assert_eq!(&buf[start..start + 1], b"{");
    }

    #[test]
    fn scans_consecutive_object_elements() {
        let buf = br#"{"a":1},{"a":2}]"#;
        match scan_next_element(buf) {
            ScanResult::Element { end, consumed } => {
                assert_eq!(&buf[..end], br#"{"a":1}"#);
                assert_eq!(buf[consumed - 1], b',');
            }
            _ => panic!("expected an element"),
        }
    }

    #[test]
    fn recognises_array_end() {
        let buf = b"]";
        assert!(matches!(scan_next_element(buf), ScanResult::ArrayEnd { consumed: 1 }));
    }

    #[test]
    fn strings_containing_brackets_do_not_confuse_depth_tracking() {
        let buf = br#""a[b]{c}",1]"#;
        match scan_next_element(buf) {
            ScanResult::Element { end, .. } => assert_eq!(&buf[..end], br#""a[b]{c}""#),
            _ => panic!("expected an element"),
        }
    }
}
