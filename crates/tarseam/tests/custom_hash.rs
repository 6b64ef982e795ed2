//! The payload hash is a process-wide factory. This lives in its own test
//! binary because swapping the factory would skew every other test sharing
//! the process.

use std::io::Cursor;

use tarseam::hash::{set_hash_factory, PayloadHash};
use tarseam::{
    disassemble, write_output, BufferStore, Entry, JsonPacker, JsonUnpacker, SeamError,
};

/// A deliberately weak stand-in digest: xor of all bytes plus a length tag.
struct XorHash {
    acc: u8,
    len: u64,
    tag: u8,
}

impl PayloadHash for XorHash {
    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.acc ^= b;
        }
        self.len += data.len() as u64;
    }

    fn finalize_reset(&mut self) -> Vec<u8> {
        let mut digest = vec![self.acc, self.tag];
        digest.extend_from_slice(&self.len.to_be_bytes());
        self.acc = 0;
        self.len = 0;
        digest
    }
}

fn xor_hash() -> Box<dyn PayloadHash> {
    Box::new(XorHash {
        acc: 0,
        len: 0,
        tag: 1,
    })
}

fn xor_hash_v2() -> Box<dyn PayloadHash> {
    Box::new(XorHash {
        acc: 0,
        len: 0,
        tag: 2,
    })
}

fn build_archive() -> Vec<u8> {
    let mut data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut data);
        let mut header = tar::Header::new_ustar();
        header.set_mode(0o644);
        header.set_size(11);
        header.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut header, "greeting", &b"hello world"[..])
            .unwrap();
        builder.finish().unwrap();
    }
    data
}

#[test]
fn test_substituted_hash_round_trips_and_mismatched_factories_fail() {
    set_hash_factory(xor_hash);

    let original = build_archive();
    let mut packed = Vec::new();
    let mut store = BufferStore::new();
    {
        let mut packer = JsonPacker::new(&mut packed);
        disassemble(Cursor::new(&original), &mut packer, &mut store).unwrap();
    }

    // the stored digest is the custom hash's output, not a CRC-64
    let mut unpacker = JsonUnpacker::new(Cursor::new(&packed));
    let mut digests = Vec::new();
    while let Some(entry) = unpacker.next().unwrap() {
        if let Entry::File(file) = entry {
            digests.push(file.payload);
        }
    }
    assert_eq!(digests, vec![{
        let mut expected = xor_hash();
        expected.update(b"hello world");
        expected.finalize_reset()
    }]);

    // matching factories: byte-identical reassembly
    let mut rebuilt = Vec::new();
    let mut unpacker = JsonUnpacker::new(Cursor::new(&packed));
    write_output(&store, &mut unpacker, &mut rebuilt).unwrap();
    assert_eq!(rebuilt, original);

    // a different assemble-time factory fails every file
    set_hash_factory(xor_hash_v2);
    let mut unpacker = JsonUnpacker::new(Cursor::new(&packed));
    let result = write_output(&store, &mut unpacker, &mut Vec::new());
    assert!(matches!(
        result,
        Err(SeamError::ChecksumMismatch { name }) if name == "greeting"
    ));
}
