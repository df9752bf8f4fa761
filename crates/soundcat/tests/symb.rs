use soundcat::binutil::ParseError;
use soundcat::symb::{SymbolCategory, SymbolSection, resolve_section};

/// Assembles a SYMB section. Offsets handed out are relative to the section.
struct SectionBuilder {
    bytes: Vec<u8>,
}

impl SectionBuilder {
    fn new() -> Self {
        let mut bytes = b"SYMB".to_vec();
        bytes.resize(0x40, 0);
        SectionBuilder { bytes }
    }

    fn here(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn name(&mut self, name: &str) -> u32 {
        let at = self.here();
        self.bytes.extend_from_slice(name.as_bytes());
        self.bytes.push(0);
        at
    }

    fn table(&mut self, entries: &[u32]) -> u32 {
        let at = self.here();
        self.bytes.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        for e in entries {
            self.bytes.extend_from_slice(&e.to_le_bytes());
        }
        at
    }

    fn point(&mut self, category: SymbolCategory, table: u32) {
        let at = category.pointer_offset() as usize;
        self.bytes[at..at + 4].copy_from_slice(&table.to_le_bytes());
    }

    /// Place the section at `base` inside a larger file.
    fn finish(mut self, base: usize) -> Vec<u8> {
        let size = self.bytes.len() as u32;
        self.bytes[4..8].copy_from_slice(&size.to_le_bytes());
        let mut file = vec![0xCC; base];
        file.extend_from_slice(&self.bytes);
        file
    }
}

#[test]
fn test_three_names_in_entry_order() {
    let mut b = SectionBuilder::new();
    let names = [b.name("SEQ_TITLE"), b.name("SEQ_FIELD"), b.name("SEQ_BOSS")];
    let table = b.table(&names);
    b.point(SymbolCategory::Sequence, table);
    let file = b.finish(0x20);

    let resolved = resolve_section(&file, 0x20).expect("Failed to resolve section");
    assert_eq!(
        resolved[&SymbolCategory::Sequence],
        ["SEQ_TITLE", "SEQ_FIELD", "SEQ_BOSS"]
    );
    for category in SymbolCategory::ALL {
        if category != SymbolCategory::Sequence {
            assert!(resolved[&category].is_empty(), "{:?}", category);
        }
    }
}

#[test]
fn test_zero_count_is_empty() {
    let mut b = SectionBuilder::new();
    let table = b.table(&[]);
    b.point(SymbolCategory::Bank, table);
    let file = b.finish(0);

    let section = SymbolSection::parse(&file, 0).unwrap();
    assert!(section.names(SymbolCategory::Bank).is_empty());
    assert_eq!(section.pointers[&SymbolCategory::Bank], table);
}

#[test]
fn test_both_player_fields_kept() {
    let mut b = SectionBuilder::new();
    let p1 = b.name("PLAYER_BGM");
    let p2 = b.name("PLAYER_SE");
    let t1 = b.table(&[p1]);
    let t2 = b.table(&[p2]);
    b.point(SymbolCategory::Player, t1);
    b.point(SymbolCategory::Player2, t2);
    let file = b.finish(0x10);

    let section = SymbolSection::parse(&file, 0x10).unwrap();
    assert_eq!(section.names(SymbolCategory::Player), ["PLAYER_BGM"]);
    assert_eq!(section.names(SymbolCategory::Player2), ["PLAYER_SE"]);
}

#[test]
fn test_unnamed_slot() {
    let mut b = SectionBuilder::new();
    let wave = b.name("WAVE_COMMON");
    let table = b.table(&[wave, 0]);
    b.point(SymbolCategory::WaveArchive, table);
    let file = b.finish(0);

    let section = SymbolSection::parse(&file, 0).unwrap();
    assert_eq!(section.names(SymbolCategory::WaveArchive), ["WAVE_COMMON", ""]);
}

#[test]
fn test_sequence_archive_two_levels() {
    let mut b = SectionBuilder::new();
    let se1 = b.name("SE_JUMP");
    let se2 = b.name("SE_COIN");
    let sub = b.table(&[se1, se2]);
    let arc = b.name("SEQARC_SE");
    let table = b.here();
    b.bytes.extend_from_slice(&1u32.to_le_bytes());
    b.bytes.extend_from_slice(&arc.to_le_bytes());
    b.bytes.extend_from_slice(&sub.to_le_bytes());
    b.point(SymbolCategory::SequenceArchive, table);
    let file = b.finish(0);

    let section = SymbolSection::parse(&file, 0).unwrap();
    assert_eq!(section.names(SymbolCategory::SequenceArchive), ["SEQARC_SE"]);
    assert_eq!(section.sequence_archives.len(), 1);
    assert_eq!(section.sequence_archives[0].sequences, ["SE_JUMP", "SE_COIN"]);
}

#[test]
fn test_huge_count_is_rejected_before_allocation() {
    let mut b = SectionBuilder::new();
    let table = b.here();
    b.bytes.extend_from_slice(&0x4000_0000u32.to_le_bytes());
    b.point(SymbolCategory::Group, table);
    let file = b.finish(0);

    assert!(matches!(
        resolve_section(&file, 0),
        Err(ParseError::OffsetOutOfRange { .. })
    ));
}

#[test]
fn test_name_offset_outside_source() {
    let mut b = SectionBuilder::new();
    let table = b.table(&[0x0010_0000]);
    b.point(SymbolCategory::Stream, table);
    let file = b.finish(0x08);

    match resolve_section(&file, 0x08) {
        Err(ParseError::OffsetOutOfRange { offset, .. }) => assert_eq!(offset, 0x08 + 0x0010_0000),
        other => panic!("Expected OffsetOutOfRange, got {:?}", other),
    }
}

#[test]
fn test_pointer_outside_source() {
    let mut b = SectionBuilder::new();
    b.point(SymbolCategory::Sequence, 0x7FFF_0000);
    let file = b.finish(0);
    assert!(matches!(
        resolve_section(&file, 0),
        Err(ParseError::OffsetOutOfRange { .. })
    ));
}

#[test]
fn test_bad_signature() {
    let mut file = SectionBuilder::new().finish(0);
    file[0] = b'X';
    assert!(matches!(
        SymbolSection::parse(&file, 0),
        Err(ParseError::UnsupportedLayout { .. })
    ));
}
