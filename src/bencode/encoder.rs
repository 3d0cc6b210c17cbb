use super::BencodeResult;
use super::BencodeValue;
use std::io::Write;
use tracing::instrument;

/// Encodes a byte slice as a bencode string.
///
/// This function writes the length of the byte slice followed by a colon and then the bytes themselves.
///
/// # Example Output
/// For input: b"hello"
/// Output: "5:hello"
#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

/// Encodes an integer as a bencode integer.
///
/// This function writes the integer prefixed with 'i' and suffixed with 'e'.
///
/// # Example Output
/// For input: 42
/// Output: "i42e"
#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{}e", i)?;
    Ok(())
}

/// Encodes a slice of BencodeValue as a bencode list.
///
/// This function writes 'l', then encodes each item in the slice, and finally writes 'e'.
///
/// # Example Output
/// For input: [1, "hello"]
/// Output: "li1e5:helloe"
#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Encodes a dictionary as a bencode mapping.
///
/// Entries are written in the order they are stored (see
/// `BencodeValue::Dict`'s doc comment) rather than sorted, so that a
/// dict decoded from the wire re-encodes byte-for-byte.
///
/// # Example Output
/// For input: [("key", 42)]
/// Output: "d3:keyi42ee"
#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(writer: &mut W, dict: &[(Vec<u8>, BencodeValue)]) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    for (key, value) in dict {
        encode_string(writer, key)?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Encodes a BencodeValue into its bencode representation.
///
/// This function matches on the variant of BencodeValue and calls the appropriate encoding function.
#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

/// Encodes a BencodeValue into its bencode byte representation.
///
/// # Example Output
/// For input: BencodeValue::Integer(42)
/// Output: b"i42e"
#[instrument(skip(value), level = "debug")]
pub fn encode(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_value(&mut buffer, value)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder::decode;

    #[test]
    fn encodes_string() {
        assert_eq!(
            encode(&BencodeValue::String(b"spam".to_vec())).unwrap(),
            b"4:spam".to_vec()
        );
    }

    #[test]
    fn encodes_integer() {
        assert_eq!(
            encode(&BencodeValue::Integer(-42)).unwrap(),
            b"i-42e".to_vec()
        );
    }

    #[test]
    fn encodes_list() {
        let value = BencodeValue::List(vec![
            BencodeValue::String(b"spam".to_vec()),
            BencodeValue::String(b"eggs".to_vec()),
        ]);
        assert_eq!(encode(&value).unwrap(), b"l4:spam4:eggse".to_vec());
    }

    #[test]
    fn encodes_dict_in_stored_order_not_sorted() {
        let value = BencodeValue::Dict(vec![
            (b"zebra".to_vec(), BencodeValue::Integer(1)),
            (b"apple".to_vec(), BencodeValue::Integer(2)),
        ]);
        assert_eq!(
            encode(&value).unwrap(),
            b"d5:zebrai1e5:applei2ee".to_vec()
        );
    }

    #[test]
    fn round_trips_through_decode() {
        let original: &[u8] = b"d3:cow3:moo4:spam4:eggse";
        let decoded = decode(original).unwrap();
        assert_eq!(encode(&decoded).unwrap(), original);
    }
}
