use crate::backend::{Atom, BackendError, WindowSystem};

/// Declares a struct of atoms interned through a [`WindowSystem`]
///
/// Fields are interned under their own name, unless an explicit name is given.
macro_rules! atoms {
    ($(#[$meta:meta])* $vis:vis $name:ident { $($field:ident $(: $atom_name:literal)?),* $(,)? }) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis struct $name {
            $(
                #[allow(missing_docs)]
                pub $field: Atom,
            )*
        }

        impl $name {
            /// Intern all atoms
            pub fn new<B: WindowSystem + ?Sized>(backend: &mut B) -> Result<Self, BackendError> {
                Ok($name {
                    $($field: backend.intern_atom(atoms!(@name $field $($atom_name)?))?,)*
                })
            }
        }
    };
    (@name $field:ident $atom_name:literal) => { $atom_name };
    (@name $field:ident) => { stringify!($field) };
}

atoms! {
    /// Atoms used by the XDND engine
    pub Atoms {
        // protocol
        XdndAware,
        XdndProxy,
        XdndEnter,
        XdndPosition,
        XdndStatus,
        XdndLeave,
        XdndDrop,
        XdndFinished,
        XdndTypeList,
        XdndSelection,

        // actions
        XdndActionCopy,
        XdndActionMove,
        XdndActionLink,
        XdndActionAsk,
        XdndActionPrivate,

        // selections
        INCR,
        TARGETS,
        ATOM,
        WINDOW,

        // data formats
        UTF8_STRING,
        STRING,
        TEXT,
        TEXT_PLAIN: "text/plain",
        TEXT_URI_LIST: "text/uri-list",
        TEXT_X_MOZ_URL: "text/x-moz-url",
    }
}
