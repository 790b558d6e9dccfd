// Operation Vocabulary
// Abstract operation names used by the emission API, each mapping to a ZAP
// opcode. The routine builder picks operand shapes and store/branch forms;
// these tables only know the spelling.

/// Branchable tests for `branch_if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Decrement and branch if now less (left must be a variable).
    DecCheck,
    Greater,
    /// Increment and branch if now greater (left must be a variable).
    IncCheck,
    Inside,
    Less,
    TestAttr,
    TestBits,
    PictureData,
    MakeMenu,
    /// Unary: was this optional parameter supplied? (left must be a variable)
    ArgProvided,
    /// Nullary checksum test.
    Verify,
    /// Nullary piracy test.
    Original,
}

/// Operand shape a condition requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Binary,
    /// Binary, left operand must be a variable used indirectly.
    BinaryVar,
    /// Unary, operand must be a variable used indirectly.
    UnaryVar,
    Nullary,
}

impl Condition {
    pub fn opcode(self) -> &'static str {
        match self {
            Condition::DecCheck => "DLESS?",
            Condition::Greater => "GRTR?",
            Condition::IncCheck => "IGRTR?",
            Condition::Inside => "IN?",
            Condition::Less => "LESS?",
            Condition::TestAttr => "FSET?",
            Condition::TestBits => "BTST",
            Condition::PictureData => "PICINF",
            Condition::MakeMenu => "MENU",
            Condition::ArgProvided => "ASSIGNED?",
            Condition::Verify => "VERIFY",
            Condition::Original => "ORIGINAL?",
        }
    }

    pub fn kind(self) -> ConditionKind {
        match self {
            Condition::DecCheck | Condition::IncCheck => ConditionKind::BinaryVar,
            Condition::ArgProvided => ConditionKind::UnaryVar,
            Condition::Verify | Condition::Original => ConditionKind::Nullary,
            _ => ConditionKind::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullaryOp {
    RestoreUndo,
    SaveUndo,
    ShowStatus,
    Catch,
}

impl NullaryOp {
    pub fn opcode(self) -> &'static str {
        match self {
            NullaryOp::RestoreUndo => "IRESTORE",
            NullaryOp::SaveUndo => "ISAVE",
            NullaryOp::ShowStatus => "USL",
            NullaryOp::Catch => "CATCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation; has no opcode of its own and emits SUB 0,x.
    Neg,
    Not,
    GetParent,
    GetPropSize,
    LoadIndirect,
    Random,
    /// Predicate opcode; emitted with a dummy branch when only the value
    /// is wanted.
    GetChild,
    /// Predicate opcode, like GetChild.
    GetSibling,
    RemoveObject,
    DirectInput,
    DirectOutput,
    OutputBuffer,
    OutputStyle,
    SplitWindow,
    SelectWindow,
    ClearWindow,
    GetCursor,
    EraseLine,
    SetFont,
    CheckUnicode,
    FlushStack,
    PopUserStack,
    PictureTable,
    MouseWindow,
    ReadMouse,
    PrintForm,
}

impl UnaryOp {
    /// The opcode, or None for Neg which lowers to SUB.
    pub fn opcode(self) -> Option<&'static str> {
        match self {
            UnaryOp::Neg => None,
            UnaryOp::Not => Some("BCOM"),
            UnaryOp::GetParent => Some("LOC"),
            UnaryOp::GetPropSize => Some("PTSIZE"),
            UnaryOp::LoadIndirect => Some("VALUE"),
            UnaryOp::Random => Some("RANDOM"),
            UnaryOp::GetChild => Some("FIRST?"),
            UnaryOp::GetSibling => Some("NEXT?"),
            UnaryOp::RemoveObject => Some("REMOVE"),
            UnaryOp::DirectInput => Some("DIRIN"),
            UnaryOp::DirectOutput => Some("DIROUT"),
            UnaryOp::OutputBuffer => Some("BUFOUT"),
            UnaryOp::OutputStyle => Some("HLIGHT"),
            UnaryOp::SplitWindow => Some("SPLIT"),
            UnaryOp::SelectWindow => Some("SCREEN"),
            UnaryOp::ClearWindow => Some("CLEAR"),
            UnaryOp::GetCursor => Some("CURGET"),
            UnaryOp::EraseLine => Some("ERASE"),
            UnaryOp::SetFont => Some("FONT"),
            UnaryOp::CheckUnicode => Some("CHECKU"),
            UnaryOp::FlushStack => Some("FSTACK"),
            UnaryOp::PopUserStack => Some("POP"),
            UnaryOp::PictureTable => Some("PICSET"),
            UnaryOp::MouseWindow => Some("MOUSE-LIMIT"),
            UnaryOp::ReadMouse => Some("MOUSE-INFO"),
            UnaryOp::PrintForm => Some("PRINTF"),
        }
    }

    /// Predicate opcodes must always branch; the emitter supplies a dummy
    /// label when the caller only wants the stored value.
    pub fn is_predicate(self) -> bool {
        matches!(self, UnaryOp::GetChild | UnaryOp::GetSibling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    And,
    ArtShift,
    Div,
    GetByte,
    GetPropAddress,
    GetProperty,
    GetNextProp,
    GetWord,
    LogShift,
    Mod,
    Mul,
    Or,
    Sub,
    MoveObject,
    SetFlag,
    ClearFlag,
    DirectOutput,
    SetCursor,
    SetColor,
    Throw,
    /// SET with a computed variable index.
    StoreIndirect,
    FlushUserStack,
    GetWindowProperty,
    ScrollWindow,
}

impl BinaryOp {
    pub fn opcode(self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::And => "BAND",
            BinaryOp::ArtShift => "ASHIFT",
            BinaryOp::Div => "DIV",
            BinaryOp::GetByte => "GETB",
            BinaryOp::GetPropAddress => "GETPT",
            BinaryOp::GetProperty => "GETP",
            BinaryOp::GetNextProp => "NEXTP",
            BinaryOp::GetWord => "GET",
            BinaryOp::LogShift => "SHIFT",
            BinaryOp::Mod => "MOD",
            BinaryOp::Mul => "MUL",
            BinaryOp::Or => "BOR",
            BinaryOp::Sub => "SUB",
            BinaryOp::MoveObject => "MOVE",
            BinaryOp::SetFlag => "FSET",
            BinaryOp::ClearFlag => "FCLEAR",
            BinaryOp::DirectOutput => "DIROUT",
            BinaryOp::SetCursor => "CURSET",
            BinaryOp::SetColor => "COLOR",
            BinaryOp::Throw => "THROW",
            BinaryOp::StoreIndirect => "SET",
            BinaryOp::FlushUserStack => "FSTACK",
            BinaryOp::GetWindowProperty => "WINGET",
            BinaryOp::ScrollWindow => "SCROLL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernaryOp {
    PutByte,
    PutProperty,
    PutWord,
    CopyTable,
    PutWindowProperty,
    DrawPicture,
    WindowStyle,
    MoveWindow,
    WindowSize,
    SetMargins,
    SetCursor,
    DirectOutput,
    ErasePicture,
}

impl TernaryOp {
    pub fn opcode(self) -> &'static str {
        match self {
            TernaryOp::PutByte => "PUTB",
            TernaryOp::PutProperty => "PUTP",
            TernaryOp::PutWord => "PUT",
            TernaryOp::CopyTable => "COPYT",
            TernaryOp::PutWindowProperty => "WINPUT",
            TernaryOp::DrawPicture => "DISPLAY",
            TernaryOp::WindowStyle => "WINATTR",
            TernaryOp::MoveWindow => "WINPOS",
            TernaryOp::WindowSize => "WINSIZE",
            TernaryOp::SetMargins => "MARGIN",
            TernaryOp::SetCursor => "CURSET",
            TernaryOp::DirectOutput => "DIROUT",
            TernaryOp::ErasePicture => "DCLEAR",
        }
    }
}

/// Print a value through one of the printing opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintOp {
    Address,
    Character,
    Number,
    Object,
    PackedAddr,
    Unicode,
}

impl PrintOp {
    pub fn opcode(self) -> &'static str {
        match self {
            PrintOp::Address => "PRINTB",
            PrintOp::Character => "PRINTC",
            PrintOp::Number => "PRINTN",
            PrintOp::Object => "PRINTD",
            PrintOp::PackedAddr => "PRINT",
            PrintOp::Unicode => "PRINTU",
        }
    }
}
