//! Minimal SPIR-V reader and patcher.
//!
//! Only what resource remapping needs: the module header, `OpName` debug
//! names and the `Binding` / `DescriptorSet` decorations of resource
//! variables. Decoration operands are patched in place, so the module layout
//! never changes.

use bindery_core::errors::{BinderyError, Result};
use rustc_hash::FxHashMap;

use crate::settings::ApiVersion;

pub const MAGIC: u32 = 0x0723_0203;
pub const HEADER_WORDS: usize = 5;

const OP_NAME: u16 = 5;
const OP_MEMBER_NAME: u16 = 6;
const OP_DECORATE: u16 = 71;

const DECORATION_BINDING: u32 = 33;
const DECORATION_DESCRIPTOR_SET: u32 = 34;

/// Parsed module header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpirvHeader {
    pub version: ApiVersion,
    pub generator: u32,
    pub id_bound: u32,
}

/// A resource variable with a `Binding` decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirvResourceBinding {
    pub id: u32,
    /// `OpName` of the variable, absent in stripped modules.
    pub name: Option<String>,
    pub binding: u32,
    pub descriptor_set: Option<u32>,
    /// Word index of the `Binding` literal.
    pub(crate) binding_word: usize,
    /// Word index of the `DescriptorSet` literal.
    pub(crate) set_word: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Instruction {
    offset: usize,
    opcode: u16,
    word_count: usize,
}

pub fn parse_header(words: &[u32]) -> Result<SpirvHeader> {
    if words.len() < HEADER_WORDS {
        return Err(BinderyError::format(format!(
            "SPIR-V module of {} words is shorter than its header",
            words.len()
        )));
    }
    if words[0] != MAGIC {
        return Err(BinderyError::format(format!("invalid SPIR-V magic number {:#010x}", words[0])));
    }
    let version = ApiVersion::new(((words[1] >> 16) & 0xFF) as u8, ((words[1] >> 8) & 0xFF) as u8);
    Ok(SpirvHeader {
        version,
        generator: words[2],
        id_bound: words[3],
    })
}

fn instructions(words: &[u32]) -> Result<Vec<Instruction>> {
    parse_header(words)?;
    let mut result = Vec::new();
    let mut offset = HEADER_WORDS;
    while offset < words.len() {
        let word_count = (words[offset] >> 16) as usize;
        let opcode = (words[offset] & 0xFFFF) as u16;
        if word_count == 0 || offset + word_count > words.len() {
            return Err(BinderyError::format(format!(
                "malformed SPIR-V instruction at word {offset} (opcode {opcode}, {word_count} words)"
            )));
        }
        result.push(Instruction {
            offset,
            opcode,
            word_count,
        });
        offset += word_count;
    }
    Ok(result)
}

/// Decodes a nul-terminated literal string packed into `words`.
fn decode_string(words: &[u32]) -> Result<String> {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| BinderyError::format("unterminated SPIR-V string literal"))?;
    String::from_utf8(bytes[..end].to_vec()).map_err(|e| BinderyError::format(format!("invalid SPIR-V string: {e}")))
}

fn encode_string(value: &str) -> Vec<u32> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes.resize(bytes.len().div_ceil(4) * 4, 0);
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Lists every variable decorated with `Binding`, in decoration order.
pub fn resource_bindings(words: &[u32]) -> Result<Vec<SpirvResourceBinding>> {
    let instructions = instructions(words)?;

    let mut names = FxHashMap::default();
    for inst in instructions.iter().filter(|i| i.opcode == OP_NAME && i.word_count >= 3) {
        let target = words[inst.offset + 1];
        names.insert(target, decode_string(&words[inst.offset + 2..inst.offset + inst.word_count])?);
    }

    let mut bindings: Vec<SpirvResourceBinding> = Vec::new();
    let mut sets = FxHashMap::default();
    for inst in instructions.iter().filter(|i| i.opcode == OP_DECORATE && i.word_count >= 4) {
        let target = words[inst.offset + 1];
        let literal_word = inst.offset + 3;
        match words[inst.offset + 2] {
            DECORATION_BINDING => bindings.push(SpirvResourceBinding {
                id: target,
                name: names.get(&target).cloned(),
                binding: words[literal_word],
                descriptor_set: None,
                binding_word: literal_word,
                set_word: None,
            }),
            DECORATION_DESCRIPTOR_SET => {
                sets.insert(target, literal_word);
            }
            _ => {}
        }
    }

    for binding in &mut bindings {
        if let Some(&word) = sets.get(&binding.id) {
            binding.set_word = Some(word);
            binding.descriptor_set = Some(words[word]);
        }
    }
    Ok(bindings)
}

/// Copy of `words` without `OpName` / `OpMemberName` debug instructions.
pub fn strip_names(words: &[u32]) -> Result<Vec<u32>> {
    let instructions = instructions(words)?;
    let mut stripped = words[..HEADER_WORDS].to_vec();
    for inst in instructions
        .iter()
        .filter(|i| i.opcode != OP_NAME && i.opcode != OP_MEMBER_NAME)
    {
        stripped.extend_from_slice(&words[inst.offset..inst.offset + inst.word_count]);
    }
    Ok(stripped)
}

// ============================================================================
// Module builder
// ============================================================================

/// Generates SPIR-V modules that declare named, decorated resources.
///
/// The result carries only debug and annotation instructions, enough for
/// tools and tests that exercise binding remapping.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    version: Option<ApiVersion>,
    names: Vec<u32>,
    decorations: Vec<u32>,
    next_id: u32,
}

impl ModuleBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: ApiVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Declares a resource variable and returns its id.
    pub fn resource(&mut self, name: &str, descriptor_set: u32, binding: u32) -> u32 {
        let id = self.next_id;
        self.next_id += 1;

        let literal = encode_string(name);
        self.names.push(((2 + literal.len() as u32) << 16) | u32::from(OP_NAME));
        self.names.push(id);
        self.names.extend(literal);

        for (decoration, value) in [(DECORATION_DESCRIPTOR_SET, descriptor_set), (DECORATION_BINDING, binding)] {
            self.decorations.extend([(4 << 16) | u32::from(OP_DECORATE), id, decoration, value]);
        }
        id
    }

    #[must_use]
    pub fn build(self) -> Vec<u32> {
        let version = self.version.unwrap_or(ApiVersion::new(1, 0));
        let mut words = vec![
            MAGIC,
            (u32::from(version.major) << 16) | (u32::from(version.minor) << 8),
            0,
            self.next_id,
            0,
        ];
        words.extend(self.names);
        words.extend(self.decorations);
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> Vec<u32> {
        let mut builder = ModuleBuilder::new().with_version(ApiVersion::new(1, 3));
        builder.resource("g_Constants", 0, 0);
        builder.resource("g_Texture", 0, 1);
        builder.build()
    }

    #[test]
    fn header_is_parsed() {
        let header = parse_header(&module()).unwrap();
        assert_eq!(header.version, ApiVersion::new(1, 3));
        assert_eq!(header.id_bound, 3);
        assert!(parse_header(&[0xDEAD_BEEF, 0, 0, 0, 0]).is_err());
        assert!(parse_header(&[MAGIC]).is_err());
    }

    #[test]
    fn bindings_carry_names_and_sets() {
        let bindings = resource_bindings(&module()).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].name.as_deref(), Some("g_Texture"));
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].descriptor_set, Some(0));
    }

    #[test]
    fn stripping_drops_names_but_keeps_decorations() {
        let stripped = strip_names(&module()).unwrap();
        assert!(stripped.len() < module().len());
        let bindings = resource_bindings(&stripped).unwrap();
        assert_eq!(bindings.len(), 2);
        assert!(bindings.iter().all(|b| b.name.is_none()));
    }

    #[test]
    fn truncated_instruction_is_rejected() {
        let mut words = module();
        words.pop();
        assert!(matches!(resource_bindings(&words), Err(BinderyError::SerializationFormat(_))));
    }

    #[test]
    fn long_names_round_trip() {
        let name = "g_AVeryLongResourceNameThatSpansSeveralWords";
        assert_eq!(decode_string(&encode_string(name)).unwrap(), name);
        // exact multiple of four still gets a terminator word
        assert_eq!(encode_string("abcd").len(), 2);
    }
}
