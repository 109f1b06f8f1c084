use std::borrow::Cow;

const BACKSLASH: u8 = b'\\';

/// Bytes that must stay in `\xHH` form: control characters, `"` and `\`.
fn is_protected(byte: u8) -> bool {
    byte <= 0x1f || byte == b'"' || byte == BACKSLASH
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|v| v as u8)
}

/// Decode nginx-style `\xHH` escape tokens in `input`.
///
/// nginx writes `"`, `\`, control characters and non-ASCII bytes to its
/// access log as `\xHH`, which is not valid JSON string content. Ordinary
/// bytes are restored, so UTF-8 text reappears, and everything that would
/// break a JSON string keeps its token with the backslash doubled.
///
/// Input without any backslash is returned borrowed and untouched. Malformed
/// escapes never fail; they are kept as literal text with the backslash
/// doubled.
pub fn decode(input: &[u8]) -> Cow<'_, [u8]> {
    if !input.contains(&BACKSLASH) {
        return Cow::Borrowed(input);
    }

    let mut out = Vec::with_capacity(input.len() + input.len() / 8);
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];

        // A full token is four bytes; anything shorter at the tail is left alone.
        if byte != BACKSLASH || i + 3 >= input.len() {
            out.push(byte);
            i += 1;
            continue;
        }

        match input[i + 1] {
            BACKSLASH => {
                out.extend_from_slice(&input[i..i + 2]);
                i += 2;
            }
            b'x' => {
                let value = hex_value(input[i + 2])
                    .zip(hex_value(input[i + 3]))
                    .map(|(hi, lo)| (hi << 4) | lo);

                match value {
                    Some(value) if !is_protected(value) => {
                        out.push(value);
                        i += 4;
                    }
                    // Protected or unparseable: keep the token, escape the backslash.
                    _ => {
                        out.extend_from_slice(b"\\\\");
                        i += 1;
                    }
                }
            }
            _ => {
                out.extend_from_slice(b"\\\\");
                i += 1;
            }
        }
    }

    Cow::Owned(out)
}
