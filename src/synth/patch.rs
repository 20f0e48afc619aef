use super::algorithm::{Algorithm, MAX_OPERATORS};
use super::envelope::{EnvelopeParams, MAX_LEVEL};
use super::operator::OperatorParams;

/// Characters available for a patch name.
pub const NAME_LENGTH: usize = 10;

/// A complete FM patch. Immutable once built; voices share it through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    name: String,
    operators: Vec<OperatorParams>,
    algorithm: Algorithm,
}

impl Patch {
    pub fn new(
        name: &str,
        operators: Vec<OperatorParams>,
        algorithm: Algorithm,
    ) -> Result<Self, String> {
        if operators.is_empty() || operators.len() > MAX_OPERATORS {
            return Err(format!(
                "Patch needs 1..={} operators, got {}.",
                MAX_OPERATORS,
                operators.len()
            ));
        }
        if algorithm.num_operators() != operators.len() {
            return Err(format!(
                "Algorithm routes {} operators but patch has {}.",
                algorithm.num_operators(),
                operators.len()
            ));
        }
        let name = name.trim_end();
        if name.len() > NAME_LENGTH || !name.bytes().all(|c| (0x20..=0x7E).contains(&c)) {
            return Err(format!("Patch name {:?} is not 10 printable ASCII characters.", name));
        }
        Ok(Self {
            name: name.to_string(),
            operators,
            algorithm,
        })
    }

    /// One sine operator at the note frequency: instant attack, full sustain,
    /// instant release.
    pub fn sine() -> Self {
        let operator = OperatorParams {
            envelope: EnvelopeParams {
                attack: 0,
                decay: 0,
                sustain: MAX_LEVEL,
                release: 0,
            },
            ..OperatorParams::default()
        };
        Self {
            name: "SINE".to_string(),
            operators: vec![operator],
            algorithm: Algorithm::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operators(&self) -> &[OperatorParams] {
        &self.operators
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    /// Per-operator frequencies for a note.
    pub fn frequencies(&self, note: u8) -> impl Iterator<Item = f32> + '_ {
        self.operators.iter().map(move |op| op.frequency(note))
    }
}
