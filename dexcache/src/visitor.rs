use crate::RawRef;

/// Things that hold collector roots.
///
/// Visiting hands every non-null root to the visitor. If the visitor rewrote
/// the root (the referent moved), the holder stores the new reference back.
pub trait VisitRoots {
    fn visit_roots(&self, visitor: &mut impl RootVisitor);
}

pub trait RootVisitor: Sized {
    /// `root` is never null. Overwrite it to relocate the reference.
    fn visit_root(&mut self, root: &mut RawRef);
}

impl<F: FnMut(&mut RawRef)> RootVisitor for F {
    #[inline]
    fn visit_root(&mut self, root: &mut RawRef) {
        self(root)
    }
}

/// Visit `root` if it is non-null, returns whether the visitor changed it.
#[inline]
pub(crate) fn visit_if_non_null(visitor: &mut impl RootVisitor, root: &mut RawRef) -> bool {
    if root.is_null() {
        return false;
    }
    let before = *root;
    visitor.visit_root(root);
    *root != before
}
