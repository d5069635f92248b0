//! The algebraic SPIR-V type system.

use crate::id::Id;

/// A SPIR-V type term.
///
/// Cross references (`element`, `pointee`, ...) are ids into the module's
/// type table, not owning references, so the pointer → struct → pointer
/// cycle of forward-declared pointer types needs no special representation.
/// Enum-valued fields (`storage_class`, `dim`, `format`) hold the grammar's
/// numeric values; symbolic names come from the grammar tables.
///
/// Two types are structurally equal iff all fields, including transitive id
/// references, are equal; derived `Eq`/`Hash` give exactly that because id
/// assignment is unique per term in a well-formed module.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Type {
    Void,
    Bool,
    Int {
        width: u32,
        signed: bool,
    },
    Float {
        width: u32,
    },
    Vector {
        element: Id,
        count: u32,
    },
    Matrix {
        /// The column vector type.
        column: Id,
        columns: u32,
    },
    Array {
        element: Id,
        /// The length constant; `None` for runtime-sized arrays.
        length: Option<Id>,
    },
    Struct {
        members: Vec<Id>,
    },
    Pointer {
        storage_class: u32,
        pointee: Id,
    },
    Image {
        sampled_type: Id,
        dim: u32,
        depth: u32,
        arrayed: u32,
        multisampled: u32,
        sampled: u32,
        format: u32,
        access: Option<u32>,
    },
    Sampler,
    SampledImage {
        image: Id,
    },
    Opaque {
        name: String,
    },
    Function {
        return_type: Id,
        params: Vec<Id>,
    },
}

impl Type {
    /// `true` for `Pointer` terms.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer { .. })
    }

    /// `true` for `Struct` terms.
    pub fn is_struct(&self) -> bool {
        matches!(self, Self::Struct { .. })
    }

    /// The ids of the types this term directly references.
    pub fn referenced_ids(&self) -> Vec<Id> {
        match self {
            Self::Void | Self::Bool | Self::Int { .. } | Self::Float { .. } | Self::Sampler
            | Self::Opaque { .. } => Vec::new(),
            Self::Vector { element, .. } => vec![*element],
            Self::Matrix { column, .. } => vec![*column],
            Self::Array { element, length } => {
                let mut ids = vec![*element];
                ids.extend(*length);
                ids
            }
            Self::Struct { members } => members.clone(),
            Self::Pointer { pointee, .. } => vec![*pointee],
            Self::Image { sampled_type, .. } => vec![*sampled_type],
            Self::SampledImage { image } => vec![*image],
            Self::Function {
                return_type,
                params,
            } => {
                let mut ids = vec![*return_type];
                ids.extend(params.iter().copied());
                ids
            }
        }
    }
}

/// Function control bit mask (`OpFunction`).
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct FunctionControl(u32);

impl FunctionControl {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Strong inlining hint.
    pub const INLINE: Self = Self(1);
    /// Suppress inlining.
    pub const DONT_INLINE: Self = Self(2);
    /// No side effects beyond the result.
    pub const PURE: Self = Self(4);
    /// Result depends only on the arguments.
    pub const CONST: Self = Self(8);

    /// Wraps a raw mask word.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw mask word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for FunctionControl {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FunctionControl {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Selection control bit mask (`OpSelectionMerge`).
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct SelectionControl(u32);

impl SelectionControl {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Flatten the selection into predicated code.
    pub const FLATTEN: Self = Self(1);
    /// Keep the branches.
    pub const DONT_FLATTEN: Self = Self(2);

    /// Wraps a raw mask word.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw mask word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SelectionControl {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SelectionControl {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Loop control bit mask (`OpLoopMerge`).
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct LoopControl(u32);

impl LoopControl {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Unroll the loop.
    pub const UNROLL: Self = Self(1);
    /// Keep the loop rolled.
    pub const DONT_UNROLL: Self = Self(2);
    /// Iterations are independent.
    pub const DEPENDENCY_INFINITE: Self = Self(4);
    /// Dependency distance follows as a literal parameter.
    pub const DEPENDENCY_LENGTH: Self = Self(8);

    /// Wraps a raw mask word.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw mask word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for LoopControl {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LoopControl {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Memory access bit mask (`OpLoad`/`OpStore`/`OpCopyMemory`).
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct MemoryAccess(u32);

impl MemoryAccess {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The access is volatile.
    pub const VOLATILE: Self = Self(1);
    /// Alignment follows as a literal parameter.
    pub const ALIGNED: Self = Self(2);
    /// The accessed address is not reused soon.
    pub const NONTEMPORAL: Self = Self(4);

    /// Wraps a raw mask word.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw mask word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for MemoryAccess {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MemoryAccess {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> Id {
        Id::new(raw).unwrap()
    }

    #[test]
    fn structural_equality() {
        let a = Type::Int {
            width: 32,
            signed: true,
        };
        let b = Type::Int {
            width: 32,
            signed: true,
        };
        let c = Type::Int {
            width: 32,
            signed: false,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);

        let v1 = Type::Vector {
            element: id(2),
            count: 4,
        };
        let v2 = Type::Vector {
            element: id(3),
            count: 4,
        };
        assert_ne!(v1, v2);
    }

    #[test]
    fn referenced_ids() {
        let f = Type::Function {
            return_type: id(2),
            params: vec![id(3), id(4)],
        };
        assert_eq!(f.referenced_ids(), vec![id(2), id(3), id(4)]);

        let rt = Type::Array {
            element: id(5),
            length: None,
        };
        assert_eq!(rt.referenced_ids(), vec![id(5)]);

        assert!(Type::Void.referenced_ids().is_empty());
    }

    #[test]
    fn predicates() {
        let p = Type::Pointer {
            storage_class: 7,
            pointee: id(2),
        };
        assert!(p.is_pointer());
        assert!(!p.is_struct());
        assert!(Type::Struct { members: vec![] }.is_struct());
    }

    #[test]
    fn function_control_mask() {
        let fc = FunctionControl::INLINE | FunctionControl::PURE;
        assert!(fc.contains(FunctionControl::INLINE));
        assert!(fc.contains(FunctionControl::PURE));
        assert!(!fc.contains(FunctionControl::CONST));
        assert_eq!(fc.bits(), 5);
        assert!(FunctionControl::NONE.is_empty());
        assert_eq!(FunctionControl::from_bits(5), fc);
    }

    #[test]
    fn selection_control_mask() {
        let mut sc = SelectionControl::NONE;
        assert!(sc.is_empty());
        sc |= SelectionControl::FLATTEN;
        assert!(sc.contains(SelectionControl::FLATTEN));
        assert!(!sc.contains(SelectionControl::DONT_FLATTEN));
        assert_eq!(sc.bits(), 1);
    }

    #[test]
    fn loop_control_mask() {
        let lc = LoopControl::UNROLL | LoopControl::DEPENDENCY_LENGTH;
        assert!(lc.contains(LoopControl::UNROLL));
        assert!(lc.contains(LoopControl::DEPENDENCY_LENGTH));
        assert!(!lc.contains(LoopControl::DONT_UNROLL));
        assert_eq!(lc.bits(), 9);
        assert_eq!(LoopControl::from_bits(9), lc);
    }

    #[test]
    fn memory_access_mask() {
        let ma = MemoryAccess::VOLATILE | MemoryAccess::ALIGNED;
        assert!(ma.contains(MemoryAccess::VOLATILE));
        assert!(!ma.contains(MemoryAccess::NONTEMPORAL));
        assert_eq!(ma.bits(), 3);
        assert!(MemoryAccess::NONE.is_empty());
    }
}
