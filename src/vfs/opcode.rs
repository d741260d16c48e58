//! Operation codes. Order is fixed by the host.

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    OpenMounts = 0,
    ReadMounts = 1,
    CloseMounts = 2,

    OpenDir = 3,
    ReadDir = 4,
    CloseDir = 5,
    Mkdir = 6,
    Rmdir = 7,
    Remove = 8,
    Rename = 9,
    GetAttr = 10,
    SetAttr = 11,

    OpenFile = 12,
    CloseFile = 13,
    WriteFile = 14,
    ReadFile = 15,
    GetFileSize = 16,
    SetFileSize = 17,
    FileSync = 18,

    Symlink = 19,
    Readlink = 20,
}

impl Opcode {
    pub const ALL: [Opcode; 21] = [
        Self::OpenMounts,
        Self::ReadMounts,
        Self::CloseMounts,
        Self::OpenDir,
        Self::ReadDir,
        Self::CloseDir,
        Self::Mkdir,
        Self::Rmdir,
        Self::Remove,
        Self::Rename,
        Self::GetAttr,
        Self::SetAttr,
        Self::OpenFile,
        Self::CloseFile,
        Self::WriteFile,
        Self::ReadFile,
        Self::GetFileSize,
        Self::SetFileSize,
        Self::FileSync,
        Self::Symlink,
        Self::Readlink,
    ];

    pub fn from_u32(v: u32) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}
