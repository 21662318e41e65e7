//! Host-side upload lists
//!
//! Entries accumulate locally and are packed into WRITE frames on `send()`:
//! up to `WRITE_MAX - WRITE_ONE + 1` entries per frame, the frame opcode
//! encoding the entry count (`WRITE_ONE + n - 1`).

use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

use super::settings::ModuleCommands;
use super::ModuleCore;
use crate::error::{KosmosError, Result};

/// Fixed-size entry of an upload buffer
pub trait UploadEntry: Clone + fmt::Debug + Send + Sync + 'static {
    /// Encoded size in bytes
    const SIZE: usize;

    fn encode(&self, out: &mut Vec<u8>);

    fn decode(bytes: &[u8]) -> Option<Self>;

    /// Decode a packed run of entries; `None` if the length is not a multiple
    /// of the entry size or an entry is invalid
    fn decode_all(bytes: &[u8]) -> Option<Vec<Self>> {
        if bytes.len() % Self::SIZE != 0 {
            return None;
        }
        bytes.chunks_exact(Self::SIZE).map(Self::decode).collect()
    }
}

/// Local list of entries waiting to be sent to one module
#[derive(Debug)]
pub struct UploadBuffer<E> {
    name: &'static str,
    capacity: usize,
    entries: Mutex<Vec<E>>,
}

impl<E: UploadEntry> UploadBuffer<E> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, entry: E) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(KosmosError::BufferFull {
                module: self.name.to_string(),
                capacity: self.capacity,
            });
        }
        entries.push(entry);
        Ok(())
    }

    /// Append every entry or none of them
    pub fn extend(&self, new: impl IntoIterator<Item = E>) -> Result<()> {
        let new: Vec<E> = new.into_iter().collect();
        let mut entries = self.entries.lock();
        if entries.len() + new.len() > self.capacity {
            return Err(KosmosError::BufferFull {
                module: self.name.to_string(),
                capacity: self.capacity,
            });
        }
        entries.extend(new);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop every entry past the first `len`
    pub fn truncate(&self, len: usize) {
        self.entries.lock().truncate(len);
    }

    /// Copy of the pending entries
    pub fn snapshot(&self) -> Vec<E> {
        self.entries.lock().clone()
    }

    /// Compile the local list into `(opcode, payload)` WRITE frames
    pub fn messages(&self, cmds: &ModuleCommands) -> Vec<(u8, Vec<u8>)> {
        let entries = self.entries.lock();
        entries
            .chunks(cmds.max_write_entries())
            .map(|chunk| {
                let mut payload = Vec::with_capacity(chunk.len() * E::SIZE);
                for entry in chunk {
                    entry.encode(&mut payload);
                }
                (cmds.write_n(chunk.len()), payload)
            })
            .collect()
    }

    /// Flush the local list to the module; the list is kept until cleared
    pub fn send(&self, core: &ModuleCore) -> Result<usize> {
        let messages = self.messages(&core.settings().cmds);
        let mut sent = 0;
        for (opcode, payload) in &messages {
            core.send_data(*opcode, payload)?;
            sent += payload.len() / E::SIZE;
        }
        if sent > 0 {
            debug!("{}: sent {} entries in {} frame(s)", self.name, sent, messages.len());
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Word(u16);

    impl UploadEntry for Word {
        const SIZE: usize = 2;

        fn encode(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.0.to_le_bytes());
        }

        fn decode(bytes: &[u8]) -> Option<Self> {
            Some(Word(u16::from_le_bytes([*bytes.first()?, *bytes.get(1)?])))
        }
    }

    #[test]
    fn test_messages_pack_sixteen_per_frame() {
        let buffer = UploadBuffer::new("TEST", 64);
        buffer.extend((0..35).map(Word)).unwrap();

        let messages = buffer.messages(&ModuleCommands::STANDARD);
        let opcodes: Vec<u8> = messages.iter().map(|(op, _)| *op).collect();
        assert_eq!(opcodes, vec![0x1F, 0x1F, 0x12]);

        let decoded: Vec<Word> = messages
            .iter()
            .flat_map(|(_, payload)| Word::decode_all(payload).unwrap())
            .collect();
        assert_eq!(decoded, (0..35).map(Word).collect::<Vec<_>>());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let buffer = UploadBuffer::new("TEST", 3);
        buffer.extend([Word(1), Word(2)]).unwrap();
        assert!(matches!(
            buffer.extend([Word(3), Word(4)]),
            Err(KosmosError::BufferFull { capacity: 3, .. })
        ));
        assert_eq!(buffer.len(), 2);
        buffer.append(Word(3)).unwrap();
        assert!(buffer.append(Word(4)).is_err());

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.messages(&ModuleCommands::STANDARD).is_empty());
    }

    #[test]
    fn test_decode_all_rejects_partial_entries() {
        assert!(Word::decode_all(&[1, 0, 2]).is_none());
    }
}
