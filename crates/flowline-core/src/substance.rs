//! Substance mixtures carried through the flow network.
//!
//! Every bag in the engine (node inbound/outbound storage, in-flight packets)
//! is a [`SubstanceVector`]: a fixed four-component vector of non-negative
//! amounts. Transfers are always *proportional*: removing an amount from a
//! bag takes the same fraction of every component, so the mixture's
//! composition is preserved as it moves downstream.

use serde::{Deserialize, Serialize};

/// Amounts at or below this threshold are treated as zero. Also guards every
/// proportional division against near-zero totals.
pub const EPSILON: f64 = 1e-6;

/// Number of substance components tracked per bag.
pub const SUBSTANCE_DIM: usize = 4;

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// One of the four substance components. The discriminant is the component's
/// index inside a [`SubstanceVector`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Solid = 0,
    Liquid = 1,
    Gas = 2,
    Data = 3,
}

impl Component {
    /// All components in index order.
    pub const ALL: [Component; SUBSTANCE_DIM] = [
        Component::Solid,
        Component::Liquid,
        Component::Gas,
        Component::Data,
    ];

    /// Index of this component inside a substance vector.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lower-case name, as used in graph descriptions.
    pub fn name(self) -> &'static str {
        match self {
            Component::Solid => "solid",
            Component::Liquid => "liquid",
            Component::Gas => "gas",
            Component::Data => "data",
        }
    }

    /// Parse a lower-case component name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "solid" => Some(Component::Solid),
            "liquid" => Some(Component::Liquid),
            "gas" => Some(Component::Gas),
            "data" => Some(Component::Data),
            _ => None,
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// SubstanceVector
// ---------------------------------------------------------------------------

/// A mixture of the four substance components.
///
/// On the wire this is an object keyed by component name; missing keys are
/// zero (`{ "liquid": 8 }`). A bare `[solid, liquid, gas, data]` array is
/// accepted too.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SubstanceBag", into = "SubstanceBag")]
pub struct SubstanceVector(pub [f64; SUBSTANCE_DIM]);

/// Named-field wire form of a [`SubstanceVector`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct SubstanceBag {
    solid: f64,
    liquid: f64,
    gas: f64,
    data: f64,
}

impl From<SubstanceBag> for SubstanceVector {
    fn from(bag: SubstanceBag) -> Self {
        SubstanceVector::new(bag.solid, bag.liquid, bag.gas, bag.data)
    }
}

impl From<SubstanceVector> for SubstanceBag {
    fn from(v: SubstanceVector) -> Self {
        let [solid, liquid, gas, data] = v.0;
        SubstanceBag {
            solid,
            liquid,
            gas,
            data,
        }
    }
}

impl SubstanceVector {
    pub const ZERO: SubstanceVector = SubstanceVector([0.0; SUBSTANCE_DIM]);

    pub fn new(solid: f64, liquid: f64, gas: f64, data: f64) -> Self {
        Self([solid, liquid, gas, data])
    }

    /// A vector holding `amount` of a single component.
    pub fn of(component: Component, amount: f64) -> Self {
        let mut v = Self::ZERO;
        v.0[component.index()] = amount;
        v
    }

    pub fn get(&self, component: Component) -> f64 {
        self.0[component.index()]
    }

    /// Sum of all components.
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// True when every component is `>= 0`.
    pub fn is_non_negative(&self) -> bool {
        self.0.iter().all(|&c| c >= 0.0)
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|c| c.is_finite())
    }

    /// Component-wise scale by `k`.
    pub fn scaled(&self, k: f64) -> SubstanceVector {
        let mut out = *self;
        for c in out.0.iter_mut() {
            *c *= k;
        }
        out
    }

    /// Remove `amount` proportionally across all components and return the
    /// removed vector. The amount is clamped to the current total; a bag whose
    /// total is at or below [`EPSILON`], or is not finite, yields nothing.
    pub fn take(&mut self, amount: f64) -> SubstanceVector {
        let total = self.total();
        if !total.is_finite() || total <= EPSILON || amount.is_nan() || amount <= 0.0 {
            return SubstanceVector::ZERO;
        }
        let ratio = (amount / total).min(1.0);
        let taken = self.scaled(ratio);
        for (a, t) in self.0.iter_mut().zip(taken.0.iter()) {
            // Clamp so rounding can never leave a component below zero.
            *a = (*a - t).max(0.0);
        }
        taken
    }
}

impl std::ops::AddAssign for SubstanceVector {
    fn add_assign(&mut self, other: SubstanceVector) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a += b;
        }
    }
}

// ---------------------------------------------------------------------------
// YieldMatrix
// ---------------------------------------------------------------------------

/// Per-node conversion table. `m[i][j]` is the fraction of input component
/// `i` that appears as output component `j`.
///
/// Rows are deliberately not normalized: a row summing to more (or less)
/// than 1 models a reaction that creates (or destroys) mass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct YieldMatrix(pub [[f64; SUBSTANCE_DIM]; SUBSTANCE_DIM]);

impl YieldMatrix {
    /// The pass-through matrix.
    pub fn identity() -> Self {
        let mut m = [[0.0; SUBSTANCE_DIM]; SUBSTANCE_DIM];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self(m)
    }

    pub fn set(&mut self, input: Component, output: Component, fraction: f64) {
        self.0[input.index()][output.index()] = fraction;
    }

    pub fn get(&self, input: Component, output: Component) -> f64 {
        self.0[input.index()][output.index()]
    }

    /// Convert a taken input vector into the produced output vector.
    pub fn apply(&self, input: &SubstanceVector) -> SubstanceVector {
        let mut out = SubstanceVector::ZERO;
        for (i, amount) in input.0.iter().enumerate() {
            for (j, produced) in out.0.iter_mut().enumerate() {
                *produced += amount * self.0[i][j];
            }
        }
        out
    }
}

// ===========================================================================
// Tests
// ===========================================================================
