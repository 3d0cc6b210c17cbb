use crate::bencode::{self, BencodeValue};
use crate::torrent::TorrentResult;
use sha1::Digest;
use sha1::Sha1;

/// Calculates the SHA-1 hash of a bencode-encoded info dictionary.
///
/// This function takes the torrent metadata's `info` value and:
/// 1. Re-encodes it into bencode format, in whatever key order it was
///    decoded with (see `BencodeValue::Dict`'s doc comment — this is
///    what makes the hash stable across a round-trip).
/// 2. Calculates the SHA-1 hash of the encoded data.
/// 3. Returns the 20-byte hash as a fixed-size array.
pub fn calculate_info_hash(info: &BencodeValue) -> TorrentResult<[u8; 20]> {
    let buffer = bencode::encode(info)?;

    let mut hasher = Sha1::new();
    hasher.update(&buffer);

    let result = hasher.finalize();
    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&result[..]);

    Ok(info_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_encoded_info_dict() {
        let info =
            BencodeValue::Dict(vec![(b"cow".to_vec(), BencodeValue::String(b"moo".to_vec()))]);
        let encoded = bencode::encode(&info).unwrap();
        assert_eq!(encoded, b"d3:cow3:mooe".to_vec());

        let expected = {
            let mut hasher = Sha1::new();
            hasher.update(&encoded);
            let digest = hasher.finalize();
            let mut out = [0u8; 20];
            out.copy_from_slice(&digest);
            out
        };

        assert_eq!(calculate_info_hash(&info).unwrap(), expected);
    }

    #[test]
    fn hash_is_sensitive_to_content() {
        let a = BencodeValue::Dict(vec![(b"a".to_vec(), BencodeValue::Integer(1))]);
        let b = BencodeValue::Dict(vec![(b"a".to_vec(), BencodeValue::Integer(2))]);
        assert_ne!(
            calculate_info_hash(&a).unwrap(),
            calculate_info_hash(&b).unwrap()
        );
    }
}
