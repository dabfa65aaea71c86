//! Managed objects the cache can point at, plus the native metadata records
//! behind field and method pointers. The cache itself never looks inside them.

/// A managed string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringObject {
    pub value: Box<str>,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClassStatus {
    Loaded,
    Resolved,
    Initialized,
}

/// A managed class
#[derive(Debug, Clone)]
pub struct Class {
    pub descriptor: Box<str>,
    pub status: ClassStatus,
    /// static field storage, filled in before the class is published
    pub statics: Box<[u64]>,
}

/// A managed method type (resolved proto)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodType {
    pub shorty: Box<str>,
}

/// A managed call site, bound once by the bootstrap method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub target: Box<str>,
}

/// Native field metadata, lives outside the managed heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: Box<str>,
    pub offset: u32,
}

/// Native method metadata, lives outside the managed heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: Box<str>,
    pub entry_point: usize,
}

impl StringObject {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Class {
    pub fn new(descriptor: &str, statics: usize) -> Self {
        Self {
            descriptor: descriptor.into(),
            status: ClassStatus::Loaded,
            statics: vec![0; statics].into_boxed_slice(),
        }
    }

    pub fn with_status(mut self, status: ClassStatus) -> Self {
        self.status = status;
        self
    }

    /// Only resolved classes may be published through the type cache.
    pub fn is_resolved(&self) -> bool {
        self.status != ClassStatus::Loaded
    }
}

impl MethodType {
    pub fn new(shorty: &str) -> Self {
        Self {
            shorty: shorty.into(),
        }
    }
}

impl CallSite {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl FieldInfo {
    pub fn new(name: &str, offset: u32) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

impl MethodInfo {
    pub fn new(name: &str, entry_point: usize) -> Self {
        Self {
            name: name.into(),
            entry_point,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_status_progression() {
        let class = Class::new("LFoo;", 2);
        assert_eq!(class.status, ClassStatus::Loaded);
        assert!(!class.is_resolved());
        assert_eq!(&*class.statics, &[0, 0]);

        let class = class.with_status(ClassStatus::Resolved);
        assert!(class.is_resolved());
        assert!(class.with_status(ClassStatus::Initialized).is_resolved());
    }
}
