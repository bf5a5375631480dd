// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal contract-call encoding for the system contracts.
//!
//! Covers exactly what the context accessor needs: a 4-byte Keccak selector
//! followed by 32-byte-word head/tail encoding of `string` and `bytes32`
//! arguments, and decoding of a single `bytes32` return word.

use lattica_types::keccak256;

const WORD: usize = 32;

/// An encodable call argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    String(String),
    FixedBytes32([u8; 32]),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::String(_))
    }
}

/// First four bytes of the Keccak-256 of the canonical method signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&digest.as_bytes()[..4]);
    sel
}

/// Encode a full call: selector plus argument words.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut head = Vec::with_capacity(args.len() * WORD);
    let mut tail = Vec::new();
    let head_len = args.len() * WORD;

    for arg in args {
        if arg.is_dynamic() {
            head.extend_from_slice(&word_from_usize(head_len + tail.len()));
            match arg {
                Token::String(value) => {
                    tail.extend_from_slice(&word_from_usize(value.len()));
                    tail.extend_from_slice(value.as_bytes());
                    let padding = (WORD - value.len() % WORD) % WORD;
                    tail.extend(std::iter::repeat(0u8).take(padding));
                }
                Token::FixedBytes32(_) => unreachable!("bytes32 is static"),
            }
        } else {
            match arg {
                Token::FixedBytes32(value) => head.extend_from_slice(value),
                Token::String(_) => unreachable!("string is dynamic"),
            }
        }
    }

    let mut call = Vec::with_capacity(4 + head.len() + tail.len());
    call.extend_from_slice(&selector(signature));
    call.extend_from_slice(&head);
    call.extend_from_slice(&tail);
    call
}

/// Decode a single `bytes32` return word.
pub fn decode_bytes32(data: &[u8]) -> Option<[u8; 32]> {
    if data.len() < WORD {
        return None;
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&data[..WORD]);
    Some(word)
}

fn word_from_usize(value: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_is_four_bytes_of_keccak() {
        let sel = selector("getContext(string)");
        let digest = keccak256(b"getContext(string)");
        assert_eq!(&sel, &digest.as_bytes()[..4]);
    }

    #[test]
    fn test_encode_string_argument_layout() {
        let call = encode_call("getContext(string)", &[Token::String("bc-7".into())]);
        // selector + offset word + length word + one padded data word
        assert_eq!(call.len(), 4 + WORD + WORD + WORD);
        // Offset points just past the single head word.
        assert_eq!(call[4 + WORD - 1], WORD as u8);
        // Length word holds 4.
        assert_eq!(call[4 + 2 * WORD - 1], 4);
        // Data is left-aligned and zero padded.
        assert_eq!(&call[4 + 2 * WORD..4 + 2 * WORD + 4], b"bc-7");
        assert!(call[4 + 2 * WORD + 4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encode_string_and_bytes32() {
        let value = [0x5Au8; 32];
        let call = encode_call(
            "setContext(string,bytes32)",
            &[Token::String("bc-12".into()), Token::FixedBytes32(value)],
        );
        // Static bytes32 sits inline as the second head word.
        assert_eq!(&call[4 + WORD..4 + 2 * WORD], &value);
        // The string offset skips both head words.
        assert_eq!(call[4 + WORD - 1], (2 * WORD) as u8);
    }

    #[test]
    fn test_decode_bytes32() {
        let mut data = vec![0u8; 32];
        data[0] = 0xAB;
        assert_eq!(decode_bytes32(&data).unwrap()[0], 0xAB);
        assert!(decode_bytes32(&[0u8; 31]).is_none());
    }
}
