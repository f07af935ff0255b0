// opcode.rs — Microop enumeration
//
// The opcode tags carried by instruction records. The numbering is fixed and
// shared with the trace producer: LLVM instruction opcodes in the low range,
// extended DMA/trig codes from 97 up. Unknown codes are a record error, not
// a variant — the engine's dispatch is a closed match.

use std::fmt;

/// Opcode tag of one dynamic instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Microop {
    Move = 0,
    Ret = 1,
    Br = 2,
    Switch = 3,
    IndirectBr = 4,
    Invoke = 5,
    Resume = 6,
    Unreachable = 7,
    Add = 8,
    FAdd = 9,
    Sub = 10,
    FSub = 11,
    Mul = 12,
    FMul = 13,
    UDiv = 14,
    SDiv = 15,
    FDiv = 16,
    URem = 17,
    SRem = 18,
    FRem = 19,
    Shl = 20,
    LShr = 21,
    AShr = 22,
    And = 23,
    Or = 24,
    Xor = 25,
    Alloca = 26,
    Load = 27,
    Store = 28,
    GetElementPtr = 29,
    Fence = 30,
    AtomicCmpXchg = 31,
    AtomicRMW = 32,
    Trunc = 33,
    ZExt = 34,
    SExt = 35,
    FPToUI = 36,
    FPToSI = 37,
    UIToFP = 38,
    SIToFP = 39,
    FPTrunc = 40,
    FPExt = 41,
    PtrToInt = 42,
    IntToPtr = 43,
    BitCast = 44,
    AddrSpaceCast = 45,
    ICmp = 46,
    FCmp = 47,
    Phi = 48,
    Call = 49,
    Select = 50,
    VAArg = 53,
    ExtractElement = 54,
    InsertElement = 55,
    ShuffleVector = 56,
    ExtractValue = 57,
    InsertValue = 58,
    LandingPad = 59,
    DmaFence = 97,
    DmaLoad = 98,
    DmaStore = 99,
    IndexAdd = 100,
    SilentStore = 101,
    Sine = 102,
    Cosine = 103,
}

impl Microop {
    /// Map a producer opcode number to a microop. `None` for codes outside
    /// the shared enumeration.
    pub fn from_code(code: u32) -> Option<Microop> {
        use Microop::*;
        Some(match code {
            0 => Move,
            1 => Ret,
            2 => Br,
            3 => Switch,
            4 => IndirectBr,
            5 => Invoke,
            6 => Resume,
            7 => Unreachable,
            8 => Add,
            9 => FAdd,
            10 => Sub,
            11 => FSub,
            12 => Mul,
            13 => FMul,
            14 => UDiv,
            15 => SDiv,
            16 => FDiv,
            17 => URem,
            18 => SRem,
            19 => FRem,
            20 => Shl,
            21 => LShr,
            22 => AShr,
            23 => And,
            24 => Or,
            25 => Xor,
            26 => Alloca,
            27 => Load,
            28 => Store,
            29 => GetElementPtr,
            30 => Fence,
            31 => AtomicCmpXchg,
            32 => AtomicRMW,
            33 => Trunc,
            34 => ZExt,
            35 => SExt,
            36 => FPToUI,
            37 => FPToSI,
            38 => UIToFP,
            39 => SIToFP,
            40 => FPTrunc,
            41 => FPExt,
            42 => PtrToInt,
            43 => IntToPtr,
            44 => BitCast,
            45 => AddrSpaceCast,
            46 => ICmp,
            47 => FCmp,
            48 => Phi,
            49 => Call,
            50 => Select,
            53 => VAArg,
            54 => ExtractElement,
            55 => InsertElement,
            56 => ShuffleVector,
            57 => ExtractValue,
            58 => InsertValue,
            59 => LandingPad,
            97 => DmaFence,
            98 => DmaLoad,
            99 => DmaStore,
            100 => IndexAdd,
            101 => SilentStore,
            102 => Sine,
            103 => Cosine,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_call_op(self) -> bool {
        self == Microop::Call
    }

    pub fn is_ret_op(self) -> bool {
        self == Microop::Ret
    }

    pub fn is_phi_op(self) -> bool {
        self == Microop::Phi
    }

    pub fn is_dma_load(self) -> bool {
        self == Microop::DmaLoad
    }

    pub fn is_dma_store(self) -> bool {
        self == Microop::DmaStore
    }

    pub fn is_dma_fence(self) -> bool {
        self == Microop::DmaFence
    }

    /// DMA ops are exempt from call/return control fences; their ordering
    /// runs through the DMA fence mechanism instead.
    pub fn is_dma_op(self) -> bool {
        self.is_dma_load() || self.is_dma_store() || self.is_dma_fence()
    }

    pub fn is_trig_op(self) -> bool {
        matches!(self, Microop::Sine | Microop::Cosine)
    }

    /// Floating-point arithmetic family; a 64-bit result marks the node
    /// double-precision.
    pub fn is_fp_op(self) -> bool {
        matches!(
            self,
            Microop::FAdd
                | Microop::FSub
                | Microop::FMul
                | Microop::FDiv
                | Microop::FRem
                | Microop::Sine
                | Microop::Cosine
        )
    }
}

impl fmt::Display for Microop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in 0u32..=110 {
            if let Some(op) = Microop::from_code(code) {
                assert_eq!(op.code() as u32, code);
            }
        }
    }

    #[test]
    fn unknown_codes_rejected() {
        assert_eq!(Microop::from_code(51), None);
        assert_eq!(Microop::from_code(96), None);
        assert_eq!(Microop::from_code(255), None);
    }

    #[test]
    fn dma_predicates() {
        assert!(Microop::DmaLoad.is_dma_op());
        assert!(Microop::DmaStore.is_dma_op());
        assert!(Microop::DmaFence.is_dma_op());
        assert!(!Microop::Load.is_dma_op());
        assert!(Microop::DmaLoad.is_dma_load());
        assert!(!Microop::DmaStore.is_dma_load());
    }

    #[test]
    fn fp_and_trig_predicates() {
        assert!(Microop::FMul.is_fp_op());
        assert!(Microop::Sine.is_fp_op());
        assert!(Microop::Sine.is_trig_op());
        assert!(!Microop::Mul.is_fp_op());
        assert!(!Microop::FMul.is_trig_op());
    }
}
