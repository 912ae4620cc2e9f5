use crate::snapshot::MetricValue;

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Integer(v) => self.int_writer.format(v),
            MetricValue::FloatingPoint(v) => self.float_writer.format(v),
        }
    }
}

/// Writes gauge samples in the statsd line format.
///
/// Every sample is its own payload: `[prefix.]name:value|g[|#tag,tag]`. When `with_length_prefix` is `true`, the
/// payload starts with its length as a little-endian `u32`, as required by stream-oriented transports.
pub(super) struct PayloadWriter {
    buf: Vec<u8>,
    prefix: Option<String>,
    tags: Vec<(String, String)>,
    with_length_prefix: bool,
    value_formatter: MetricValueFormatter,
}

impl PayloadWriter {
    pub fn new(with_length_prefix: bool) -> Self {
        Self {
            buf: Vec::new(),
            prefix: None,
            tags: Vec::new(),
            with_length_prefix,
            value_formatter: MetricValueFormatter::new(),
        }
    }

    /// Sets the prefix prepended, with a dot, to every metric name.
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Sets the tags appended to every sample.
    pub fn with_tags(mut self, tags: &[(String, String)]) -> Self {
        self.tags = tags.to_vec();
        self
    }

    /// Writes a single gauge sample, returning the finished payload.
    pub fn write_gauge(&mut self, name: &str, value: MetricValue) -> &[u8] {
        self.buf.clear();
        if self.with_length_prefix {
            // Filled in once the payload is complete.
            self.buf.extend_from_slice(&[0, 0, 0, 0]);
        }

        if let Some(prefix) = &self.prefix {
            self.buf.extend_from_slice(prefix.as_bytes());
            self.buf.push(b'.');
        }
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(b':');
        self.buf.extend_from_slice(self.value_formatter.format(value).as_bytes());
        self.buf.extend_from_slice(b"|g");

        for (i, (key, value)) in self.tags.iter().enumerate() {
            if i == 0 {
                self.buf.extend_from_slice(b"|#");
            } else {
                self.buf.push(b',');
            }
            write_tag(&mut self.buf, key, value);
        }

        if self.with_length_prefix {
            let len = (self.buf.len() - 4) as u32;
            self.buf[..4].copy_from_slice(&len.to_le_bytes());
        }

        &self.buf
    }
}

fn write_tag(buf: &mut Vec<u8>, key: &str, value: &str) {
    // An empty value is written as a bare tag, `key` rather than `key:`.
    buf.extend_from_slice(key.as_bytes());
    if value.is_empty() {
        return;
    }

    buf.push(b':');
    buf.extend_from_slice(value.as_bytes());
}
