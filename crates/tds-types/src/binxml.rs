//! Binary XML to text.
//!
//! The server may return `xml` values in its binary XML encoding: a short
//! header followed by a token stream. Structure tokens open and close
//! elements, define names and carry comments, processing instructions and
//! CDATA. Atomic tokens carry typed text content, one token per SQL or XSD
//! scalar type, and are rendered in their XML lexical form.
//!
//! Names are defined once in a 1-based table and referenced by index.
//! Qualified names reference three name entries (namespace, prefix, local
//! name). A nested document saves both tables and restores them on exit;
//! a flush token clears them.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tds_wire::collation::encoding_for_code_page;
use tds_wire::registry::time_width;
use tds_wire::utf16::decode_utf16_lossy;
use uuid::Uuid;

use crate::error::TypeError;
use crate::numeric::Numeric;
use crate::temporal;

const SIGNATURE: [u8; 2] = [0xDF, 0xFF];
const ENCODING_UTF16: [u8; 2] = [0xB0, 0x04];

mod token {
    pub const XML_DECL: u8 = 0xFE;
    pub const ENCODING: u8 = 0xFD;
    pub const DOCTYPE: u8 = 0xFC;
    pub const SYSTEM: u8 = 0xFB;
    pub const PUBLIC: u8 = 0xFA;
    pub const SUBSET: u8 = 0xF9;
    pub const ELEMENT: u8 = 0xF8;
    pub const END_ELEMENT: u8 = 0xF7;
    pub const ATTRIBUTE: u8 = 0xF6;
    pub const END_ATTRIBUTES: u8 = 0xF5;
    pub const PI: u8 = 0xF4;
    pub const COMMENT: u8 = 0xF3;
    pub const CDATA: u8 = 0xF2;
    pub const END_CDATA: u8 = 0xF1;
    pub const NAME: u8 = 0xF0;
    pub const QNAME: u8 = 0xEF;
    pub const XML_TEXT: u8 = 0xED;
    pub const NEST: u8 = 0xEC;
    pub const END_NEST: u8 = 0xEB;
    pub const EXTN: u8 = 0xEA;
    pub const FLUSH_NAMES: u8 = 0xE9;

    pub const SQL_SMALLINT: u8 = 0x01;
    pub const SQL_INT: u8 = 0x02;
    pub const SQL_REAL: u8 = 0x03;
    pub const SQL_FLOAT: u8 = 0x04;
    pub const SQL_MONEY: u8 = 0x05;
    pub const SQL_BIT: u8 = 0x06;
    pub const SQL_TINYINT: u8 = 0x07;
    pub const SQL_BIGINT: u8 = 0x08;
    pub const SQL_UUID: u8 = 0x09;
    pub const SQL_DECIMAL: u8 = 0x0A;
    pub const SQL_NUMERIC: u8 = 0x0B;
    pub const SQL_BINARY: u8 = 0x0C;
    pub const SQL_CHAR: u8 = 0x0D;
    pub const SQL_NCHAR: u8 = 0x0E;
    pub const SQL_VARBINARY: u8 = 0x0F;
    pub const SQL_VARCHAR: u8 = 0x10;
    pub const SQL_NVARCHAR: u8 = 0x11;
    pub const SQL_DATETIME: u8 = 0x12;
    pub const SQL_SMALLDATETIME: u8 = 0x13;
    pub const SQL_SMALLMONEY: u8 = 0x14;
    pub const SQL_TEXT: u8 = 0x16;
    pub const SQL_IMAGE: u8 = 0x17;
    pub const SQL_NTEXT: u8 = 0x18;
    pub const SQL_UDT: u8 = 0x1B;

    pub const XSD_TIMEOFFSET: u8 = 0x7A;
    pub const XSD_DATETIMEOFFSET: u8 = 0x7B;
    pub const XSD_DATEOFFSET: u8 = 0x7C;
    pub const XSD_TIME2: u8 = 0x7D;
    pub const XSD_DATETIME2: u8 = 0x7E;
    pub const XSD_DATE2: u8 = 0x7F;
    pub const XSD_TIME: u8 = 0x81;
    pub const XSD_DATETIME: u8 = 0x82;
    pub const XSD_DATE: u8 = 0x83;
    pub const XSD_BINHEX: u8 = 0x84;
    pub const XSD_BASE64: u8 = 0x85;
    pub const XSD_BOOLEAN: u8 = 0x86;
    pub const XSD_DECIMAL: u8 = 0x87;
    pub const XSD_BYTE: u8 = 0x88;
    pub const XSD_UNSIGNEDSHORT: u8 = 0x89;
    pub const XSD_UNSIGNEDINT: u8 = 0x8A;
    pub const XSD_UNSIGNEDLONG: u8 = 0x8B;
    pub const XSD_QNAME: u8 = 0x8C;
}

/// Whether `t` is an atomic value token.
const fn is_atomic(t: u8) -> bool {
    matches!(t, 0x01..=0x1B | 0x7A..=0x8C)
}

#[derive(Debug, Clone, Default)]
struct QName {
    prefix: usize,
    local: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    Text,
    Attribute,
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    names: Vec<String>,
    qnames: Vec<QName>,
    saved: Vec<(Vec<String>, Vec<QName>)>,
    open: Vec<String>,
    out: String,
}

/// Decode a binary XML document to text.
pub fn decode(data: &[u8]) -> Result<String, TypeError> {
    let mut decoder = Decoder {
        data,
        pos: 0,
        names: Vec::new(),
        qnames: Vec::new(),
        saved: Vec::new(),
        open: Vec::new(),
        out: String::with_capacity(data.len()),
    };
    decoder.header()?;
    while decoder.pos < decoder.data.len() {
        decoder.node()?;
    }
    if !decoder.open.is_empty() {
        return Err(decoder.fail("unclosed element"));
    }
    if !decoder.saved.is_empty() {
        return Err(decoder.fail("unterminated nested document"));
    }
    Ok(decoder.out)
}

impl<'a> Decoder<'a> {
    fn fail(&self, reason: &'static str) -> TypeError {
        TypeError::BinXml {
            offset: self.pos,
            reason,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TypeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.fail("truncated"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TypeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8, TypeError> {
        Ok(self.array::<1>()?[0])
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// 7-bit little-endian groups, high bit set on all but the last.
    fn varint(&mut self, max_bytes: u32) -> Result<u64, TypeError> {
        let mut value = 0u64;
        for i in 0..max_bytes {
            let b = self.byte()?;
            value |= u64::from(b & 0x7F) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(self.fail("varint too long"))
    }

    fn mb32(&mut self) -> Result<usize, TypeError> {
        let v = self.varint(5)?;
        u32::try_from(v)
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| self.fail("mb32 overflow"))
    }

    fn mb64(&mut self) -> Result<usize, TypeError> {
        let v = self.varint(10)?;
        usize::try_from(v).map_err(|_| self.fail("mb64 overflow"))
    }

    /// Character count then UTF-16LE text.
    fn utf16(&mut self, chars: usize) -> Result<String, TypeError> {
        let len = chars.checked_mul(2).ok_or_else(|| self.fail("text too long"))?;
        Ok(decode_utf16_lossy(self.take(len)?))
    }

    fn text_data(&mut self) -> Result<String, TypeError> {
        let chars = self.mb32()?;
        self.utf16(chars)
    }

    fn header(&mut self) -> Result<(), TypeError> {
        if self.array::<2>()? != SIGNATURE {
            return Err(self.fail("missing signature"));
        }
        if !matches!(self.byte()?, 1 | 2) {
            return Err(self.fail("unsupported version"));
        }
        if self.array::<2>()? != ENCODING_UTF16 {
            return Err(self.fail("unsupported encoding"));
        }
        Ok(())
    }

    fn name(&self, id: usize) -> Result<&str, TypeError> {
        match id {
            0 => Ok(""),
            n => self
                .names
                .get(n - 1)
                .map(String::as_str)
                .ok_or_else(|| self.fail("undefined name")),
        }
    }

    fn qname(&self, id: usize) -> Result<String, TypeError> {
        let q = id
            .checked_sub(1)
            .and_then(|i| self.qnames.get(i))
            .ok_or_else(|| self.fail("undefined qualified name"))?;
        let prefix = self.name(q.prefix)?;
        let local = self.name(q.local)?;
        Ok(if prefix.is_empty() {
            local.to_owned()
        } else {
            format!("{prefix}:{local}")
        })
    }

    /// Handle a name definition token if one is next.
    fn definitions(&mut self) -> Result<bool, TypeError> {
        match self.peek() {
            Some(token::NAME) => {
                self.pos += 1;
                let name = self.text_data()?;
                self.names.push(name);
            }
            Some(token::QNAME) => {
                self.pos += 1;
                let _namespace = self.mb32()?;
                let prefix = self.mb32()?;
                let local = self.mb32()?;
                self.qnames.push(QName { prefix, local });
            }
            Some(token::FLUSH_NAMES) => {
                self.pos += 1;
                self.names.clear();
                self.qnames.clear();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn node(&mut self) -> Result<(), TypeError> {
        if self.definitions()? {
            return Ok(());
        }
        let start = self.pos;
        let t = self.byte()?;
        match t {
            token::XML_DECL => self.xml_decl(),
            token::DOCTYPE => self.doctype(),
            token::ELEMENT => self.element(),
            token::END_ELEMENT => {
                let name = self.open.pop().ok_or_else(|| self.fail("unbalanced end tag"))?;
                self.out.push_str("</");
                self.out.push_str(&name);
                self.out.push('>');
                Ok(())
            }
            token::PI => {
                let target = self.mb32()?;
                let target = self.name(target)?.to_owned();
                let text = self.text_data()?;
                self.out.push_str("<?");
                self.out.push_str(&target);
                if !text.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(&text);
                }
                self.out.push_str("?>");
                Ok(())
            }
            token::COMMENT => {
                let text = self.text_data()?;
                self.out.push_str("<!--");
                self.out.push_str(&text);
                self.out.push_str("-->");
                Ok(())
            }
            token::CDATA => {
                self.out.push_str("<![CDATA[");
                loop {
                    let text = self.text_data()?;
                    self.out.push_str(&text);
                    match self.byte()? {
                        token::END_CDATA => break,
                        // a "]]>" inside the text splits the section
                        token::CDATA => self.out.push_str("]]><![CDATA["),
                        _ => return Err(self.fail("unterminated cdata")),
                    }
                }
                self.out.push_str("]]>");
                Ok(())
            }
            token::NEST => {
                self.saved
                    .push((std::mem::take(&mut self.names), std::mem::take(&mut self.qnames)));
                Ok(())
            }
            token::END_NEST => {
                let (names, qnames) = self
                    .saved
                    .pop()
                    .ok_or_else(|| self.fail("unbalanced nested document"))?;
                self.names = names;
                self.qnames = qnames;
                Ok(())
            }
            token::EXTN => {
                let len = self.mb32()?;
                self.take(len)?;
                Ok(())
            }
            token::XML_TEXT => {
                let text = self.text_data()?;
                escape_into(&mut self.out, &text, Escape::Text);
                Ok(())
            }
            t if is_atomic(t) => {
                let text = self.atom(t)?;
                escape_into(&mut self.out, &text, Escape::Text);
                Ok(())
            }
            _ => {
                self.pos = start;
                Err(self.fail("unexpected token"))
            }
        }
    }

    fn xml_decl(&mut self) -> Result<(), TypeError> {
        let version = self.text_data()?;
        self.out.push_str("<?xml version=\"");
        self.out.push_str(&version);
        self.out.push('"');
        if self.peek() == Some(token::ENCODING) {
            self.pos += 1;
            let encoding = self.text_data()?;
            self.out.push_str(" encoding=\"");
            self.out.push_str(&encoding);
            self.out.push('"');
        }
        match self.byte()? {
            1 => self.out.push_str(" standalone=\"yes\""),
            2 => self.out.push_str(" standalone=\"no\""),
            _ => {}
        }
        self.out.push_str("?>");
        Ok(())
    }

    fn doctype(&mut self) -> Result<(), TypeError> {
        let name = self.text_data()?;
        let (mut system, mut public, mut subset) = (None, None, None);
        loop {
            match self.peek() {
                Some(token::SYSTEM) => {
                    self.pos += 1;
                    system = Some(self.text_data()?);
                }
                Some(token::PUBLIC) => {
                    self.pos += 1;
                    public = Some(self.text_data()?);
                }
                Some(token::SUBSET) => {
                    self.pos += 1;
                    subset = Some(self.text_data()?);
                }
                _ => break,
            }
        }
        self.out.push_str("<!DOCTYPE ");
        self.out.push_str(&name);
        match (public, system) {
            (Some(p), Some(s)) => self.out.push_str(&format!(" PUBLIC \"{p}\" \"{s}\"")),
            (Some(p), None) => self.out.push_str(&format!(" PUBLIC \"{p}\"")),
            (None, Some(s)) => self.out.push_str(&format!(" SYSTEM \"{s}\"")),
            (None, None) => {}
        }
        if let Some(subset) = subset {
            self.out.push_str(" [");
            self.out.push_str(&subset);
            self.out.push(']');
        }
        self.out.push('>');
        Ok(())
    }

    fn element(&mut self) -> Result<(), TypeError> {
        let id = self.mb32()?;
        let name = self.qname(id)?;
        self.out.push('<');
        self.out.push_str(&name);

        let mut has_attributes = false;
        loop {
            if self.definitions()? {
                continue;
            }
            if self.peek() != Some(token::ATTRIBUTE) {
                break;
            }
            self.pos += 1;
            has_attributes = true;
            let id = self.mb32()?;
            let attr = self.qname(id)?;
            let mut value = String::new();
            while let Some(t) = self.peek().filter(|&t| is_atomic(t)) {
                self.pos += 1;
                value.push_str(&self.atom(t)?);
            }
            self.out.push(' ');
            self.out.push_str(&attr);
            self.out.push_str("=\"");
            escape_into(&mut self.out, &value, Escape::Attribute);
            self.out.push('"');
        }
        if has_attributes && self.peek() == Some(token::END_ATTRIBUTES) {
            self.pos += 1;
        }

        if self.peek() == Some(token::END_ELEMENT) {
            self.pos += 1;
            self.out.push_str("/>");
        } else {
            self.out.push('>');
            self.open.push(name);
        }
        Ok(())
    }

    /// Lexical form of an atomic value whose token was just read.
    #[allow(clippy::too_many_lines)]
    fn atom(&mut self, t: u8) -> Result<String, TypeError> {
        use token::*;
        Ok(match t {
            SQL_TINYINT => self.byte()?.to_string(),
            SQL_BIT => (if self.byte()? == 0 { "0" } else { "1" }).to_owned(),
            XSD_BOOLEAN => (if self.byte()? == 0 { "false" } else { "true" }).to_owned(),
            XSD_BYTE => i8::from_le_bytes(self.array()?).to_string(),
            SQL_SMALLINT => i16::from_le_bytes(self.array()?).to_string(),
            XSD_UNSIGNEDSHORT => u16::from_le_bytes(self.array()?).to_string(),
            SQL_INT => i32::from_le_bytes(self.array()?).to_string(),
            XSD_UNSIGNEDINT => u32::from_le_bytes(self.array()?).to_string(),
            SQL_BIGINT => i64::from_le_bytes(self.array()?).to_string(),
            XSD_UNSIGNEDLONG => u64::from_le_bytes(self.array()?).to_string(),
            SQL_REAL => format_float(f64::from(f32::from_le_bytes(self.array()?))),
            SQL_FLOAT => format_float(f64::from_le_bytes(self.array()?)),
            SQL_MONEY => temporal::decode_money(&self.array::<8>()?)?.to_string(),
            SQL_SMALLMONEY => temporal::decode_money(&self.array::<4>()?)?.to_string(),
            SQL_DECIMAL | SQL_NUMERIC | XSD_DECIMAL => {
                let size = usize::from(self.byte()?);
                let body = self.take(size)?;
                let [_precision, scale, sign, magnitude @ ..] = body else {
                    return Err(self.fail("short decimal"));
                };
                Numeric::from_wire(*sign == 1, magnitude, *scale)?.to_string()
            }
            SQL_UUID => Uuid::from_bytes_le(self.array()?).hyphenated().to_string(),
            SQL_NCHAR | SQL_NVARCHAR | SQL_NTEXT => {
                let chars = self.mb64()?;
                self.utf16(chars)?
            }
            SQL_CHAR | SQL_VARCHAR | SQL_TEXT => {
                let len = self.mb64()?;
                let body = self.take(len)?;
                if body.len() < 4 {
                    return Err(self.fail("short code page text"));
                }
                let (code_page, text) = body.split_at(4);
                let code_page =
                    u32::from_le_bytes([code_page[0], code_page[1], code_page[2], code_page[3]]);
                let encoding = encoding_for_code_page(u16::try_from(code_page).unwrap_or(1252));
                encoding.decode_without_bom_handling(text).0.into_owned()
            }
            SQL_BINARY | SQL_VARBINARY | SQL_IMAGE | SQL_UDT | XSD_BASE64 => {
                let len = self.mb64()?;
                BASE64.encode(self.take(len)?)
            }
            XSD_BINHEX => {
                let len = self.mb64()?;
                hex::encode_upper(self.take(len)?)
            }
            SQL_DATETIME => format_datetime(temporal::decode_datetime(&self.array::<8>()?)?),
            SQL_SMALLDATETIME => {
                format_datetime(temporal::decode_smalldatetime(&self.array::<4>()?)?)
            }
            XSD_DATE2 => temporal::decode_date(&self.array::<3>()?)?
                .format("%Y-%m-%d")
                .to_string(),
            XSD_TIME2 => {
                let scale = self.byte()?;
                let bytes = self.take(usize::from(time_width(scale)))?;
                temporal::decode_time(bytes, scale)?.format("%H:%M:%S%.f").to_string()
            }
            XSD_DATETIME2 => {
                let scale = self.byte()?;
                let bytes = self.take(usize::from(time_width(scale)) + 3)?;
                format_datetime(temporal::decode_datetime2(bytes, scale)?)
            }
            XSD_TIMEOFFSET | XSD_DATETIMEOFFSET | XSD_DATEOFFSET => {
                let scale = self.byte()?;
                let bytes = self.take(usize::from(time_width(scale)) + 5)?;
                let dto = temporal::decode_datetimeoffset(bytes, scale)?;
                let pattern = match t {
                    XSD_TIMEOFFSET => "%H:%M:%S%.f%:z",
                    XSD_DATEOFFSET => "%Y-%m-%d%:z",
                    _ => "%Y-%m-%dT%H:%M:%S%.f%:z",
                };
                dto.format(pattern).to_string()
            }
            XSD_TIME | XSD_DATETIME | XSD_DATE => {
                let raw = u64::from_le_bytes(self.array()?);
                let dt = ticks_to_datetime(raw & 0x3FFF_FFFF_FFFF_FFFF)
                    .ok_or_else(|| self.fail("date out of range"))?;
                let utc = if raw >> 62 == 1 { "Z" } else { "" };
                let body = match t {
                    XSD_TIME => dt.format("%H:%M:%S%.f").to_string(),
                    XSD_DATE => dt.format("%Y-%m-%d").to_string(),
                    _ => format_datetime(dt),
                };
                format!("{body}{utc}")
            }
            XSD_QNAME => {
                let id = self.mb32()?;
                self.qname(id)?
            }
            _ => return Err(self.fail("unknown atomic token")),
        })
    }
}

/// 100 ns ticks since 0001-01-01.
fn ticks_to_datetime(ticks: u64) -> Option<NaiveDateTime> {
    const TICKS_PER_DAY: u64 = 864_000_000_000;
    let days = i32::try_from(ticks / TICKS_PER_DAY).ok()?;
    let date = NaiveDate::from_num_days_from_ce_opt(days.checked_add(1)?)?;
    let nanos = i64::try_from(ticks % TICKS_PER_DAY).ok()? * 100;
    Some(date.and_time(NaiveTime::MIN) + TimeDelta::nanoseconds(nanos))
}

fn format_datetime(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v.is_infinite() {
        (if v > 0.0 { "INF" } else { "-INF" }).to_owned()
    } else if v != 0.0 && !(1e-6..1e15).contains(&v.abs()) {
        format!("{v:E}")
    } else {
        v.to_string()
    }
}

fn escape_into(out: &mut String, text: &str, mode: Escape) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' if mode == Escape::Text => out.push_str("&gt;"),
            '"' if mode == Escape::Attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Builds binary XML documents for tests.
    struct Doc(Vec<u8>);

    impl Doc {
        fn new() -> Self {
            Self(vec![0xDF, 0xFF, 0x01, 0xB0, 0x04])
        }

        fn tok(mut self, t: u8) -> Self {
            self.0.push(t);
            self
        }

        fn mb(mut self, mut v: u64) -> Self {
            loop {
                let b = (v & 0x7F) as u8;
                v >>= 7;
                if v == 0 {
                    self.0.push(b);
                    return self;
                }
                self.0.push(b | 0x80);
            }
        }

        fn raw(mut self, bytes: &[u8]) -> Self {
            self.0.extend_from_slice(bytes);
            self
        }

        fn text(self, s: &str) -> Self {
            let units: Vec<u16> = s.encode_utf16().collect();
            let mut doc = self.mb(units.len() as u64);
            for u in units {
                doc.0.extend_from_slice(&u.to_le_bytes());
            }
            doc
        }

        fn name(self, s: &str) -> Self {
            self.tok(token::NAME).text(s)
        }

        fn qname(self, prefix: u64, local: u64) -> Self {
            self.tok(token::QNAME).mb(0).mb(prefix).mb(local)
        }

        fn nvarchar(self, s: &str) -> Self {
            self.tok(token::SQL_NVARCHAR).text(s)
        }
    }

    #[test]
    fn test_elements_attributes_and_text() {
        // <root a="1 &amp; 2"><child/>x &lt; y</root>
        let doc = Doc::new()
            .name("root")
            .qname(0, 1)
            .name("a")
            .qname(0, 2)
            .name("child")
            .qname(0, 3)
            .tok(token::ELEMENT)
            .mb(1)
            .tok(token::ATTRIBUTE)
            .mb(2)
            .nvarchar("1 & 2")
            .tok(token::END_ATTRIBUTES)
            .tok(token::ELEMENT)
            .mb(3)
            .tok(token::END_ELEMENT)
            .nvarchar("x < y")
            .tok(token::END_ELEMENT);
        assert_eq!(
            decode(&doc.0).unwrap(),
            r#"<root a="1 &amp; 2"><child/>x &lt; y</root>"#
        );
    }

    #[test]
    fn test_prefixed_names_and_typed_values() {
        let doc = Doc::new()
            .name("p")
            .name("v")
            .qname(1, 2)
            .tok(token::ELEMENT)
            .mb(1)
            .tok(token::SQL_INT)
            .raw(&(-42i32).to_le_bytes())
            .tok(token::END_ELEMENT);
        assert_eq!(decode(&doc.0).unwrap(), "<p:v>-42</p:v>");

        let doc = Doc::new()
            .name("d")
            .qname(0, 1)
            .tok(token::ELEMENT)
            .mb(1)
            .tok(token::SQL_DECIMAL)
            .raw(&[5, 10, 2, 0, 0x00, 0x0E])
            .tok(token::END_ELEMENT);
        assert_eq!(decode(&doc.0).unwrap(), "<d>-35.84</d>");

        let doc = Doc::new()
            .name("b")
            .qname(0, 1)
            .tok(token::ELEMENT)
            .mb(1)
            .tok(token::XSD_BASE64)
            .mb(3)
            .raw(b"abc")
            .tok(token::END_ELEMENT);
        assert_eq!(decode(&doc.0).unwrap(), "<b>YWJj</b>");
    }

    #[test]
    fn test_declaration_comment_pi_cdata() {
        let doc = Doc::new()
            .tok(token::XML_DECL)
            .text("1.0")
            .tok(token::ENCODING)
            .text("utf-16")
            .raw(&[1])
            .name("go")
            .tok(token::PI)
            .mb(1)
            .text("fast")
            .tok(token::COMMENT)
            .text(" hi ")
            .tok(token::CDATA)
            .text("<raw>")
            .tok(token::END_CDATA);
        assert_eq!(
            decode(&doc.0).unwrap(),
            r#"<?xml version="1.0" encoding="utf-16" standalone="yes"?><?go fast?><!-- hi --><![CDATA[<raw>]]>"#
        );
    }

    #[test]
    fn test_nested_document_restores_names() {
        let doc = Doc::new()
            .name("outer")
            .qname(0, 1)
            .tok(token::ELEMENT)
            .mb(1)
            .tok(token::NEST)
            .name("inner")
            .qname(0, 1)
            .tok(token::ELEMENT)
            .mb(1)
            .tok(token::END_ELEMENT)
            .tok(token::END_NEST)
            .tok(token::END_ELEMENT);
        assert_eq!(decode(&doc.0).unwrap(), "<outer><inner/></outer>");
    }

    #[test]
    fn test_flush_clears_names() {
        let doc = Doc::new()
            .name("a")
            .qname(0, 1)
            .tok(token::FLUSH_NAMES)
            .tok(token::ELEMENT)
            .mb(1);
        let err = decode(&doc.0).unwrap_err();
        assert!(matches!(
            err,
            TypeError::BinXml {
                reason: "undefined qualified name",
                ..
            }
        ));
    }

    #[test]
    fn test_malformed_input() {
        assert!(decode(&[0xDF, 0xFF]).is_err());
        assert!(decode(&[0x3C, 0x00]).is_err());
        let unclosed = Doc::new().name("a").qname(0, 1).tok(token::ELEMENT).mb(1);
        assert!(decode(&unclosed.0).is_err());
        let bad = Doc::new().tok(0x50);
        assert!(matches!(
            decode(&bad.0),
            Err(TypeError::BinXml { offset: 5, .. })
        ));
    }

    #[test]
    fn test_multibyte_varint() {
        let long = "x".repeat(200);
        let doc = Doc::new().nvarchar(&long);
        assert_eq!(decode(&doc.0).unwrap(), long);
    }
}
