//! Canonical Huffman coding over a 256-symbol (byte) alphabet.
//!
//! Two steps, same as a classic canonical-Huffman codec: build a code
//! *shape* from an input histogram (symbol frequencies), then derive the
//! canonical codes from the resulting code lengths alone (RFC 1951 sec.
//! 3.2.2) so only the 256-byte length table needs to travel on the wire.

const ALPHABET: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HuffmanError {
    #[error("huffman code length exceeds 64 bits")]
    CodeTooLong,
    #[error("huffman input exhausted before output was filled")]
    InputExhausted,
}

struct ShapeNode {
    probability: f32,
    left: Option<usize>,
    right: Option<usize>,
}

/// Builds the per-symbol code length table from the combined histogram of
/// `input_lists`. Mirrors `HuffmanCode::create`'s shape-building half: a
/// sorted-insertion greedy merge (equivalent to a priority queue) followed
/// by a preorder length assignment.
pub fn build_lengths(input_lists: &[&[u8]]) -> Result<[u8; ALPHABET], HuffmanError> {
    let mut histogram = [0u32; ALPHABET];
    let mut total = 0u64;
    for list in input_lists {
        for &byte in *list {
            histogram[byte as usize] += 1;
            total += 1;
        }
    }

    let mut nodes: Vec<ShapeNode> = (0..ALPHABET)
        .map(|symbol| ShapeNode {
            probability: if total > 0 {
                histogram[symbol] as f32 / total as f32
            } else {
                1.0 / ALPHABET as f32
            },
            left: None,
            right: None,
        })
        .collect();

    // Active list holds arena indices, sorted descending by probability so
    // the two lowest-probability entries are always at the back.
    let mut active: Vec<usize> = (0..ALPHABET).collect();
    active.sort_by(|&a, &b| nodes[b].probability.total_cmp(&nodes[a].probability));

    while active.len() > 1 {
        let idx2 = active.pop().unwrap();
        let idx1 = active.pop().unwrap();
        let probability = nodes[idx1].probability + nodes[idx2].probability;

        nodes.push(ShapeNode {
            probability,
            left: Some(idx1),
            right: Some(idx2),
        });
        let merged = nodes.len() - 1;

        let insert_at = active
            .iter()
            .rposition(|&i| nodes[i].probability > probability)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        active.insert(insert_at, merged);
    }

    let root = active[0];
    let mut lengths = [0u8; ALPHABET];
    assign_lengths(&nodes, root, 0, &mut lengths)?;
    Ok(lengths)
}

fn assign_lengths(
    nodes: &[ShapeNode],
    node: usize,
    depth: u32,
    lengths: &mut [u8; ALPHABET],
) -> Result<(), HuffmanError> {
    if depth > 64 {
        return Err(HuffmanError::CodeTooLong);
    }
    match (nodes[node].left, nodes[node].right) {
        (None, None) => {
            lengths[node] = depth as u8;
            Ok(())
        }
        (Some(left), Some(right)) => {
            assign_lengths(nodes, left, depth + 1, lengths)?;
            assign_lengths(nodes, right, depth + 1, lengths)
        }
        _ => unreachable!("huffman merge nodes always have two children"),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Code {
    code: u64,
    length: u8,
}

struct TreeNode {
    left: Option<usize>,
    right: Option<usize>,
    symbol: Option<u8>,
}

/// A decoder/encoder built from a 256-byte canonical length table, as
/// carried in a `GeometryHeader`.
pub struct HuffmanCode {
    codes: [Code; ALPHABET],
    tree: Vec<TreeNode>,
}

impl HuffmanCode {
    /// Canonical construction from code lengths (mirrors `import_code`).
    pub fn from_lengths(lengths: &[u8; ALPHABET]) -> Self {
        let mut length_count = [0u32; ALPHABET];
        for &length in lengths {
            length_count[length as usize] += 1;
        }

        let mut base_codes = [0u64; ALPHABET];
        for length in 1..ALPHABET {
            base_codes[length] = (base_codes[length - 1] + length_count[length - 1] as u64) << 1;
        }

        let mut codes = [Code::default(); ALPHABET];
        let mut tree = vec![TreeNode {
            left: None,
            right: None,
            symbol: None,
        }];

        for (symbol, &length) in lengths.iter().enumerate() {
            let code = base_codes[length as usize];
            base_codes[length as usize] += 1;

            codes[symbol] = Code {
                code,
                length,
            };

            let mut node = 0usize;
            for bit in (0..length as i32).rev() {
                let go_right = (code >> bit) & 1 == 1;
                let next = if go_right {
                    &mut tree[node].right
                } else {
                    &mut tree[node].left
                };
                node = match *next {
                    Some(existing) => existing,
                    None => {
                        tree.push(TreeNode {
                            left: None,
                            right: None,
                            symbol: None,
                        });
                        let new_index = tree.len() - 1;
                        *next = Some(new_index);
                        new_index
                    }
                };
            }
            tree[node].symbol = Some(symbol as u8);
        }

        Self { codes, tree }
    }

    /// Builds a fresh code from a histogram and immediately canonicalizes
    /// it, mirroring `HuffmanCode::create`'s final export+reimport step.
    pub fn build(input_lists: &[&[u8]]) -> Result<Self, HuffmanError> {
        let lengths = build_lengths(input_lists)?;
        Ok(Self::from_lengths(&lengths))
    }

    pub fn lengths(&self) -> [u8; ALPHABET] {
        let mut lengths = [0u8; ALPHABET];
        for (symbol, code) in self.codes.iter().enumerate() {
            lengths[symbol] = code.length;
        }
        lengths
    }

    /// MSB-first bit-packs `input`, zero-padding the final byte.
    pub fn encode(&self, input: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(input.len());
        let mut buffer: u64 = 0;
        let mut buffer_bits: u32 = 0;

        for &byte in input {
            let code = self.codes[byte as usize];
            buffer = (buffer << code.length) | code.code;
            buffer_bits += code.length as u32;

            while buffer_bits >= 8 {
                let shift = buffer_bits - 8;
                output.push(((buffer >> shift) & 0xFF) as u8);
                buffer_bits -= 8;
            }
        }

        if buffer_bits > 0 {
            let byte = ((buffer & ((1 << buffer_bits) - 1)) << (8 - buffer_bits)) as u8;
            output.push(byte);
        }

        output
    }

    /// Bit-walks `input` MSB-first until `output.len()` symbols are decoded.
    pub fn decode(&self, input: &[u8], output: &mut [u8]) -> Result<(), HuffmanError> {
        let mut buffer: u8 = 0;
        let mut buffer_bits: u32 = 0;
        let mut offset = 0usize;

        for slot in output.iter_mut() {
            let mut node = 0usize;
            while self.tree[node].left.is_some() || self.tree[node].right.is_some() {
                if buffer_bits == 0 {
                    if offset >= input.len() {
                        return Err(HuffmanError::InputExhausted);
                    }
                    buffer = input[offset];
                    buffer_bits = 8;
                    offset += 1;
                }

                node = if buffer & 0x80 == 0 {
                    self.tree[node].left.expect("descended into left child")
                } else {
                    self.tree[node].right.expect("descended into right child")
                };
                buffer <<= 1;
                buffer_bits -= 1;
            }

            *slot = self.tree[node].symbol.expect("leaf node carries a symbol");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let data: Vec<u8> = (0..=255u16).flat_map(|v| [v as u8; 3]).collect();
        let code = HuffmanCode::build(&[&data]).unwrap();
        let encoded = code.encode(&data);

        let mut decoded = vec![0u8; data.len()];
        code.decode(&encoded, &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn round_trips_through_serialized_lengths() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let code = HuffmanCode::build(&[data]).unwrap();
        let lengths = code.lengths();

        let rebuilt = HuffmanCode::from_lengths(&lengths);
        let encoded = rebuilt.encode(data);

        let mut decoded = vec![0u8; data.len()];
        rebuilt.decode(&encoded, &mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn empty_input_uses_uniform_lengths() {
        let lengths = build_lengths(&[]).unwrap();
        // A uniform 256-symbol alphabet forms a balanced tree, length 8 for every symbol.
        assert!(lengths.iter().all(|&length| length == 8));
    }

    #[test]
    fn combined_histogram_shares_one_table() {
        let a = [0u8, 0, 0, 1];
        let b = [2u8, 2, 2, 2];
        let code = HuffmanCode::build(&[&a, &b]).unwrap();

        let encoded_a = code.encode(&a);
        let mut decoded_a = vec![0u8; a.len()];
        code.decode(&encoded_a, &mut decoded_a).unwrap();
        assert_eq!(decoded_a, a);

        let encoded_b = code.encode(&b);
        let mut decoded_b = vec![0u8; b.len()];
        code.decode(&encoded_b, &mut decoded_b).unwrap();
        assert_eq!(decoded_b, b);
    }
}
