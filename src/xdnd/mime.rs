//! Mapping between mime types and the atoms advertised over XDND

use encoding_rs::{UTF_16LE, WINDOWS_1252};
use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::warn;

use super::Atoms;
use crate::backend::{Atom, BackendError, WindowSystem, NONE};

/// Ordered, deduplicated list of type atoms offered by a drag source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeList {
    atoms: IndexSet<Atom>,
}

impl TypeList {
    /// Append an atom, keeping the first occurrence of duplicates
    pub fn push(&mut self, atom: Atom) {
        if atom != NONE {
            self.atoms.insert(atom);
        }
    }

    /// Number of types
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Whether no type is offered
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Whether the list does not fit into an enter message
    pub fn needs_property(&self) -> bool {
        self.atoms.len() > 3
    }

    /// The first three types, as carried inline by an enter message
    pub fn inline(&self) -> [Atom; 3] {
        let mut inline = [NONE; 3];
        for (slot, atom) in inline.iter_mut().zip(self.atoms.iter()) {
            *slot = *atom;
        }
        inline
    }

    /// Whether `atom` is offered
    pub fn contains(&self, atom: Atom) -> bool {
        self.atoms.contains(&atom)
    }

    /// Iterate the types in offer order
    pub fn iter(&self) -> impl Iterator<Item = Atom> + '_ {
        self.atoms.iter().copied()
    }
}

impl FromIterator<Atom> for TypeList {
    fn from_iter<T: IntoIterator<Item = Atom>>(iter: T) -> Self {
        let mut list = TypeList::default();
        for atom in iter {
            list.push(atom);
        }
        list
    }
}

/// Atoms a mime type is advertised as, the mime type itself first
pub fn atoms_for_format<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    format: &str,
) -> Result<SmallVec<[Atom; 4]>, BackendError> {
    let mut result = SmallVec::new();
    result.push(backend.intern_atom(format)?);
    match format {
        "text/plain" => result.extend([atoms.UTF8_STRING, atoms.STRING, atoms.TEXT]),
        "text/uri-list" => result.push(atoms.TEXT_X_MOZ_URL),
        _ => {}
    }
    Ok(result)
}

/// Mime type an offered atom stands for
pub fn format_for_atom<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    atom: Atom,
) -> Result<String, BackendError> {
    match atom {
        x if x == atoms.UTF8_STRING || x == atoms.STRING || x == atoms.TEXT => Ok("text/plain".into()),
        x if x == atoms.TEXT_X_MOZ_URL => Ok("text/uri-list".into()),
        x => backend.atom_name(x),
    }
}

/// Mime types of an offer, deduplicated in offer order
pub fn formats_for_types<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    types: &TypeList,
) -> Vec<String> {
    let mut formats = IndexSet::new();
    for atom in types.iter() {
        match format_for_atom(backend, atoms, atom) {
            Ok(format) => {
                formats.insert(format);
            }
            Err(err) => warn!(atom, ?err, "Unable to determine mime type of offered atom"),
        }
    }
    formats.into_iter().collect()
}

/// Best offered atom to fetch `format` with
pub fn atom_for_format<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    format: &str,
    types: &TypeList,
) -> Result<Option<Atom>, BackendError> {
    let exact = backend.intern_atom(format)?;
    if types.contains(exact) {
        return Ok(Some(exact));
    }

    let candidates: &[Atom] = match format {
        "text/plain" => &[atoms.UTF8_STRING, atoms.STRING, atoms.TEXT],
        "text/uri-list" => &[atoms.TEXT_X_MOZ_URL],
        _ => &[],
    };
    Ok(candidates.iter().copied().find(|atom| types.contains(*atom)))
}

/// Data converted for a selection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedData {
    /// Type atom to store the data with
    pub type_: Atom,
    /// Element size in bits
    pub format: u8,
    /// The data
    pub data: Vec<u8>,
}

/// Convert the data of `format` into the representation requested by `target`
pub fn convert_outgoing(atoms: &Atoms, target: Atom, format: &str, data: Vec<u8>) -> ConvertedData {
    let data = match target {
        x if x == atoms.STRING => {
            let text = String::from_utf8_lossy(&data);
            let (latin1, _, unmappable) = WINDOWS_1252.encode(&text);
            if unmappable {
                warn!(format, "Text is not representable as STRING, replacing characters");
            }
            latin1.into_owned()
        }
        x if x == atoms.TEXT_X_MOZ_URL => {
            let text = String::from_utf8_lossy(&data);
            let url = text.lines().next().unwrap_or_default();
            url.encode_utf16()
                .chain("\n".encode_utf16())
                .flat_map(u16::to_le_bytes)
                .collect()
        }
        _ => data,
    };

    ConvertedData {
        type_: target,
        format: 8,
        data,
    }
}

/// Convert data fetched as `target` back into the representation of its mime type
pub fn convert_incoming(atoms: &Atoms, target: Atom, type_: Atom, data: Vec<u8>) -> Vec<u8> {
    if type_ == atoms.STRING || (target == atoms.STRING && type_ != atoms.UTF8_STRING) {
        let (text, _) = WINDOWS_1252.decode_without_bom_handling(&data);
        return text.into_owned().into_bytes();
    }

    if target == atoms.TEXT_X_MOZ_URL {
        let (text, _) = UTF_16LE.decode_without_bom_handling(&data);
        let url = text.lines().next().unwrap_or_default().trim_end_matches('\0');
        return format!("{url}\r\n").into_bytes();
    }

    data
}
