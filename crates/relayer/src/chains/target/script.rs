//! Invocation-script assembly for the target chain's VM.

const PUSH0: u8 = 0x00;
const PUSHDATA1: u8 = 0x4C;
const PUSHDATA2: u8 = 0x4D;
const PUSHDATA4: u8 = 0x4E;
const PUSHM1: u8 = 0x4F;
const PUSH1: u8 = 0x51;
const APPCALL: u8 = 0x67;
const PACK: u8 = 0xC1;

#[derive(Default)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.script
    }

    pub fn emit(&mut self, opcode: u8) -> &mut Self {
        self.script.push(opcode);
        self
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> &mut Self {
        match data.len() {
            0..=0x4B => {
                self.script.push(data.len() as u8);
            }
            0x4C..=0xFF => {
                self.script.push(PUSHDATA1);
                self.script.push(data.len() as u8);
            }
            0x100..=0xFFFF => {
                self.script.push(PUSHDATA2);
                self.script.extend_from_slice(&(data.len() as u16).to_le_bytes());
            }
            _ => {
                self.script.push(PUSHDATA4);
                self.script.extend_from_slice(&(data.len() as u32).to_le_bytes());
            }
        }
        self.script.extend_from_slice(data);
        self
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        match value {
            -1 => self.emit(PUSHM1),
            0 => self.emit(PUSH0),
            1..=16 => self.emit(PUSH1 + (value as u8) - 1),
            _ => {
                // minimal little-endian two's-complement encoding
                let negative = value < 0;
                let mut bytes = value.to_le_bytes().to_vec();
                while bytes.len() > 1 {
                    let last = bytes[bytes.len() - 1];
                    let next_msb = bytes[bytes.len() - 2] & 0x80 != 0;
                    let redundant = if negative {
                        last == 0xFF && next_msb
                    } else {
                        last == 0x00 && !next_msb
                    };
                    if !redundant {
                        break;
                    }
                    bytes.pop();
                }
                self.push_bytes(&bytes)
            }
        }
    }
}

/// `method(params...)` on `contract`: parameters pushed in reverse, packed
/// into an array, followed by the method name and the application call.
pub fn invocation_script(contract: &[u8; 20], method: &str, params: &[Vec<u8>]) -> Vec<u8> {
    let mut builder = ScriptBuilder::new();
    for param in params.iter().rev() {
        builder.push_bytes(param);
    }
    builder.push_int(params.len() as i64);
    builder.emit(PACK);
    builder.push_bytes(method.as_bytes());
    builder.emit(APPCALL);
    let mut script = builder.into_bytes();
    script.extend_from_slice(contract);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_push_is_direct() {
        let mut builder = ScriptBuilder::new();
        builder.push_bytes(&[0xAA, 0xBB]);
        assert_eq!(builder.into_bytes(), vec![0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn long_push_uses_pushdata() {
        let data = vec![0x42; 300];
        let mut builder = ScriptBuilder::new();
        builder.push_bytes(&data);
        let script = builder.into_bytes();
        assert_eq!(script[0], PUSHDATA2);
        assert_eq!(u16::from_le_bytes([script[1], script[2]]), 300);
        assert_eq!(script.len(), 3 + 300);
    }

    #[test]
    fn small_ints_use_dedicated_opcodes() {
        let mut builder = ScriptBuilder::new();
        builder.push_int(0).push_int(1).push_int(16).push_int(-1);
        assert_eq!(builder.into_bytes(), vec![PUSH0, PUSH1, PUSH1 + 15, PUSHM1]);
    }

    #[test]
    fn large_int_is_minimal_le() {
        let mut builder = ScriptBuilder::new();
        builder.push_int(0x1234);
        assert_eq!(builder.into_bytes(), vec![0x02, 0x34, 0x12]);
    }

    #[test]
    fn invocation_script_layout() {
        let contract = [0x99u8; 20];
        let script = invocation_script(&contract, "m", &[vec![0x01], vec![0x02, 0x03]]);
        // second param first (reverse order)
        let expect_prefix: Vec<u8> = vec![
            0x02, 0x02, 0x03, // push [02 03]
            0x01, 0x01, // push [01]
            PUSH1 + 1, // two parameters
            PACK,
            0x01, b'm',
            APPCALL,
        ];
        assert_eq!(&script[..expect_prefix.len()], &expect_prefix[..]);
        assert_eq!(&script[expect_prefix.len()..], &contract[..]);
    }
}
