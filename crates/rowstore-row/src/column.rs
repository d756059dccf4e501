//! Column definitions and the column mini-language.
//!
//! A column is written as `<Type> <nick>-<width> {encoder} "description"`,
//! for example `long c-4 {b256} "reference counter"`. The width suffix may
//! be omitted for types with a natural width, the encoder may be omitted
//! for anything but cardinals, and the description defaults to the nickname.

use rowstore_common::{Result, StoreError};
use std::fmt;

/// Interpretation of a cell's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    Boolean,
    Binary,
    String,
    Cardinal,
    Bitfield,
}

impl CellType {
    /// Type tag used when printing a column.
    pub fn tag(&self) -> &'static str {
        match self {
            CellType::Boolean => "boolean",
            CellType::Binary => "byte[]",
            CellType::String => "String",
            CellType::Cardinal => "Cardinal",
            CellType::Bitfield => "Bitfield",
        }
    }

    /// Parses a type tag into a cell type and its natural width, if any.
    fn from_tag(tag: &str) -> Option<(CellType, Option<usize>)> {
        let parsed = match tag {
            "boolean" => (CellType::Boolean, Some(1)),
            "byte" => (CellType::Cardinal, Some(1)),
            "short" => (CellType::Cardinal, Some(2)),
            "int" => (CellType::Cardinal, Some(4)),
            "long" => (CellType::Cardinal, Some(8)),
            "char" => (CellType::Binary, Some(1)),
            "byte[]" => (CellType::Binary, None),
            "String" => (CellType::String, None),
            "Cardinal" => (CellType::Cardinal, None),
            "Bitfield" => (CellType::Bitfield, None),
            _ => return None,
        };
        Some(parsed)
    }
}

/// How a cardinal is laid out in its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoder {
    /// Raw bytes, no numeric interpretation.
    Bytes,
    /// Base-64 digits, six bits per byte.
    B64e,
    /// Big-endian binary.
    B256,
}

impl Encoder {
    pub fn name(&self) -> &'static str {
        match self {
            Encoder::Bytes => "bytes",
            Encoder::B64e => "b64e",
            Encoder::B256 => "b256",
        }
    }

    fn from_name(name: &str) -> Option<Encoder> {
        match name {
            "bytes" => Some(Encoder::Bytes),
            "b64e" => Some(Encoder::B64e),
            "b256" => Some(Encoder::B256),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Encoder::Bytes)
    }
}

/// One fixed-width cell of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    nickname: String,
    cell_type: CellType,
    width: usize,
    encoder: Encoder,
    description: String,
}

impl Column {
    pub fn new(
        nickname: impl Into<String>,
        cell_type: CellType,
        encoder: Encoder,
        width: usize,
        description: impl Into<String>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            cell_type,
            width,
            encoder,
            description: description.into(),
        }
    }

    /// Parses one column definition.
    pub fn parse(definition: &str) -> Result<Column> {
        let err = |reason: &str| {
            StoreError::SchemaDefinition(format!("{reason} in column '{}'", definition.trim()))
        };

        // description
        let (rest, description) = match definition.find('"') {
            Some(open) => {
                let close = definition.rfind('"').filter(|&c| c > open);
                let close = close.ok_or_else(|| err("unterminated description"))?;
                if !definition[close + 1..].trim().is_empty() {
                    return Err(err("trailing text after description"));
                }
                (&definition[..open], Some(&definition[open + 1..close]))
            }
            None => (definition, None),
        };

        // encoder
        let (rest, encoder) = match rest.find('{') {
            Some(open) => {
                let close = rest[open..]
                    .find('}')
                    .map(|c| c + open)
                    .ok_or_else(|| err("unterminated encoder"))?;
                let name = rest[open + 1..close].trim();
                let encoder = Encoder::from_name(name)
                    .ok_or_else(|| err(&format!("unknown encoder '{name}'")))?;
                if !rest[close + 1..].trim().is_empty() {
                    return Err(err("unexpected text after encoder"));
                }
                (&rest[..open], Some(encoder))
            }
            None => (rest, None),
        };

        let mut tokens = rest.split_whitespace();
        let (tag, name) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(tag), Some(name), None) => (tag, name),
            _ => return Err(err("expected '<type> <name>'")),
        };
        let (cell_type, natural_width) =
            CellType::from_tag(tag).ok_or_else(|| err(&format!("unknown type tag '{tag}'")))?;

        let (nickname, explicit_width) = match name.rsplit_once('-') {
            Some((nick, width)) if !nick.is_empty() && width.bytes().all(|b| b.is_ascii_digit()) => {
                let width = width
                    .parse::<usize>()
                    .map_err(|_| err("width out of range"))?;
                (nick, Some(width))
            }
            _ => (name, None),
        };
        let width = explicit_width
            .or(natural_width)
            .ok_or_else(|| err(&format!("type '{tag}' needs a width")))?;
        if width == 0 {
            return Err(err("width must be positive"));
        }

        let encoder = match (cell_type, encoder) {
            (CellType::Cardinal, Some(Encoder::Bytes)) | (CellType::Cardinal, None) => {
                return Err(err("cardinal columns need a {b64e} or {b256} encoder"));
            }
            (_, Some(encoder)) => encoder,
            (_, None) => Encoder::Bytes,
        };
        if cell_type == CellType::Cardinal && encoder == Encoder::B256 && width > 8 {
            return Err(err("b256 cardinals are at most 8 bytes wide"));
        }

        let description = description.unwrap_or(nickname);
        Ok(Column::new(nickname, cell_type, encoder, width, description))
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn encoder(&self) -> Encoder {
        self.encoder
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{} {{{}}} \"{}\"",
            self.cell_type.tag(),
            self.nickname,
            self.width,
            self.encoder.name(),
            self.description
        )
    }
}
