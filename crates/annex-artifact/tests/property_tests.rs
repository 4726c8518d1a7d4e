use annex_artifact::{ArtifactBundle, ArtifactError, ArtifactReader, ArtifactWriter, SectionKind};
use annex_engine::ScannConfig;
use proptest::prelude::*;

// Strategy: section names are header-safe (no newline), payloads arbitrary
fn arb_name() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_:]{0,20}"
}

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..300)
}

fn arb_sections() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::vec((arb_name(), arb_payload()), 1..12)
}

fn write_all(sections: &[(String, Vec<u8>)]) -> (Vec<u8>, Vec<usize>) {
    let mut writer = ArtifactWriter::new(Vec::new());
    let mut boundaries = vec![0];
    for (name, payload) in sections {
        writer.write_section(SectionKind::RawSpan, name, payload).unwrap();
        boundaries.push(writer.bytes_written() as usize);
    }
    (writer.finish().unwrap(), boundaries)
}

fn read_all(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ArtifactError> {
    let mut reader = ArtifactReader::new(bytes);
    let mut out = Vec::new();
    while let Some(header) = reader.next_header()? {
        let payload = reader.read_payload(&header)?;
        out.push((header.name, payload));
    }
    Ok(out)
}

proptest! {
    #[test]
    fn prop_sections_roundtrip(sections in arb_sections()) {
        let (bytes, _) = write_all(&sections);
        let read = read_all(&bytes).unwrap();
        prop_assert_eq!(read, sections);
    }

    #[test]
    fn prop_truncation_detected(sections in arb_sections(), cut in any::<prop::sample::Index>()) {
        let (bytes, boundaries) = write_all(&sections);
        let cut = cut.index(bytes.len());

        match read_all(&bytes[..cut]) {
            // Only a cut on a section boundary reads cleanly, as a prefix
            Ok(read) => {
                prop_assert!(boundaries.contains(&cut), "cut {} is not a boundary", cut);
                prop_assert_eq!(&read[..], &sections[..read.len()]);
            }
            Err(ArtifactError::Corruption(_)) => {
                prop_assert!(!boundaries.contains(&cut));
            }
            Err(e) => prop_assert!(false, "unexpected error: {}", e),
        }
    }

    #[test]
    fn prop_unknown_sections_skipped(
        noise in arb_sections(),
        dataset in prop::collection::vec(-1e6f32..1e6, 0..64),
        ids in prop::collection::vec(any::<i64>(), 0..32),
    ) {
        let mut bundle = ArtifactBundle::new(ScannConfig::brute_force(1));
        bundle.dataset = Some(dataset);
        bundle.id_map = Some(ids);

        // Interleave sections the bundle reader does not know about
        let mut writer = ArtifactWriter::new(Vec::new());
        for (name, payload) in &noise {
            writer.write_section(SectionKind::StructuredConfig, &format!("x_{}", name), payload).unwrap();
        }
        let mut bytes = writer.finish().unwrap();
        bytes.extend(bundle.write_to(Vec::new(), true).unwrap());

        prop_assert_eq!(ArtifactBundle::read_from(&bytes[..]).unwrap(), bundle);
    }
}
