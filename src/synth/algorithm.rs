use super::operator::{OperatorParams, OperatorState};
use super::prelude::{fmt, MAX_MODULATION_INDEX, TAU};
use rand::rngs::SmallRng;

/// Upper bound on operators per patch. Modulator sets are stored as 7-bit
/// masks in sysex, so this must stay below 8.
pub const MAX_OPERATORS: usize = 6;

/// Phase offset in cycles produced by a modulator output of 1.0.
const MODULATION_SCALE: f32 = MAX_MODULATION_INDEX / TAU;

/// FM routing: which operators modulate which, and which are summed to the
/// output. Self-modulation is an operator's `feedback` parameter, not an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Algorithm {
    modulators: Vec<Vec<usize>>,
    carriers: Vec<usize>,
    order: Vec<usize>,
}

impl Algorithm {
    /// `modulators[i]` lists the operators whose output modulates operator `i`.
    pub fn new(modulators: Vec<Vec<usize>>, carriers: Vec<usize>) -> Result<Self, String> {
        let num_ops = modulators.len();
        if num_ops == 0 || num_ops > MAX_OPERATORS {
            return Err(format!(
                "Operator count {} outside 1..={}.",
                num_ops, MAX_OPERATORS
            ));
        }
        if carriers.is_empty() {
            return Err("Algorithm needs at least one carrier.".to_string());
        }
        if let Some(&max_carrier) = carriers.iter().max() {
            if max_carrier >= num_ops {
                return Err(format!(
                    "Carrier index {} out of bounds for {} operators.",
                    max_carrier, num_ops
                ));
            }
        }
        for (target, sources) in modulators.iter().enumerate() {
            for &source in sources {
                if source >= num_ops {
                    return Err(format!(
                        "Modulator {} of operator {} out of bounds.",
                        source, target
                    ));
                }
                if source == target {
                    return Err(format!(
                        "Operator {} cannot modulate itself; use feedback.",
                        target
                    ));
                }
            }
        }

        let mut modulators = modulators;
        for sources in modulators.iter_mut() {
            sources.sort_unstable();
            sources.dedup();
        }
        let mut carriers = carriers;
        carriers.sort_unstable();
        carriers.dedup();

        let order = Self::evaluation_order(&modulators);
        Ok(Self {
            modulators,
            carriers,
            order,
        })
    }

    /// Builds an algorithm from bitmasks (bit `j` set = operator `j`).
    pub fn from_masks(carrier_mask: u8, modulator_masks: &[u8]) -> Result<Self, String> {
        let num_ops = modulator_masks.len();
        let bits = |mask: u8| (0..8usize).filter(move |&bit| mask & (1u8 << bit) != 0);
        if bits(carrier_mask).any(|bit| bit >= num_ops) {
            return Err(format!(
                "Carrier mask {:#04x} names operators beyond {}.",
                carrier_mask, num_ops
            ));
        }
        let modulators = modulator_masks.iter().map(|&m| bits(m).collect()).collect();
        Self::new(modulators, bits(carrier_mask).collect())
    }

    /// Single carrier, no modulation.
    pub fn simple(num_operators: usize) -> Result<Self, String> {
        Self::new(vec![Vec::new(); num_operators], vec![0])
    }

    /// Serial chain: operator `i + 1` modulates operator `i`, operator 0 is heard.
    pub fn stack(num_operators: usize) -> Result<Self, String> {
        let modulators = (0..num_operators)
            .map(|i| {
                if i + 1 < num_operators {
                    vec![i + 1]
                } else {
                    Vec::new()
                }
            })
            .collect();
        Self::new(modulators, vec![0])
    }

    /// Every operator is an unmodulated carrier (additive).
    pub fn parallel(num_operators: usize) -> Result<Self, String> {
        Self::new(
            vec![Vec::new(); num_operators],
            (0..num_operators).collect(),
        )
    }

    pub fn num_operators(&self) -> usize {
        self.modulators.len()
    }

    pub fn carriers(&self) -> &[usize] {
        &self.carriers
    }

    pub fn modulators_of(&self, op: usize) -> &[usize] {
        self.modulators.get(op).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_carrier(&self, op: usize) -> bool {
        self.carriers.contains(&op)
    }

    /// Order in which operators are computed each sample.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn carrier_mask(&self) -> u8 {
        Self::mask(&self.carriers)
    }

    pub fn modulator_mask(&self, op: usize) -> u8 {
        Self::mask(self.modulators_of(op))
    }

    fn mask(ops: &[usize]) -> u8 {
        ops.iter().fold(0u8, |mask, &op| mask | (1u8 << op))
    }

    /// Topological order (modulators before the operators they modulate),
    /// lowest index first among ready operators. A cycle is broken by taking
    /// the lowest remaining index; the edge back into it then reads the
    /// previous sample.
    fn evaluation_order(modulators: &[Vec<usize>]) -> Vec<usize> {
        let num_ops = modulators.len();
        let mut done = vec![false; num_ops];
        let mut order = Vec::with_capacity(num_ops);
        while order.len() < num_ops {
            let ready = (0..num_ops)
                .find(|&op| !done[op] && modulators[op].iter().all(|&src| done[src]));
            let next = match ready {
                Some(op) => op,
                None => (0..num_ops).find(|&op| !done[op]).unwrap_or(0),
            };
            done[next] = true;
            order.push(next);
        }
        order
    }

    /// Computes one sample for a voice: every operator advances once, and the
    /// carrier outputs are summed.
    ///
    /// A modulator already computed this sample contributes its current
    /// output; otherwise (cyclic routing) its previous output is used.
    pub fn render_sample(
        &self,
        operators: &[OperatorParams],
        states: &mut [OperatorState],
        frequencies: &[f32],
        sample_rate: f32,
        rng: &mut SmallRng,
    ) -> f32 {
        let mut output = 0.0;
        for &op in &self.order {
            let modulation: f32 = self.modulators[op]
                .iter()
                .map(|&src| states[src].last_output())
                .sum::<f32>()
                * MODULATION_SCALE;
            let sample = states[op].advance(
                &operators[op],
                frequencies[op],
                modulation,
                sample_rate,
                rng,
            );
            if self.is_carrier(op) {
                output += sample;
            }
        }
        output
    }
}

impl Default for Algorithm {
    /// One operator, heard directly.
    fn default() -> Self {
        Self {
            modulators: vec![Vec::new()],
            carriers: vec![0],
            order: vec![0],
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "carriers {:?}", self.carriers)?;
        for (op, sources) in self.modulators.iter().enumerate() {
            if !sources.is_empty() {
                write!(f, ", op {} <- {:?}", op, sources)?;
            }
        }
        Ok(())
    }
}
