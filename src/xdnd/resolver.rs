//! Resolution of the window under the pointer

use tracing::trace;

use super::Atoms;
use crate::backend::{BackendError, ShapeKind, WindowSystem, X11Window};
use crate::utils::{Local, Point, Root};

/// Advertised XDND version of `window`, `None` if it is not XdndAware
pub fn aware_version<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    window: X11Window,
) -> Result<Option<u32>, BackendError> {
    Ok(backend
        .get_property(window, atoms.XdndAware, None, 1)?
        .map(|prop| prop.first_u32().unwrap_or(0)))
}

fn is_aware<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    window: X11Window,
) -> Result<bool, BackendError> {
    Ok(backend.get_property(window, atoms.XdndAware, None, 0)?.is_some())
}

/// The proxy of `window`, if it points to a proxy that points to itself
pub fn get_proxy_window<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    window: X11Window,
) -> Result<Option<X11Window>, BackendError> {
    if let Some(proxy) = backend
        .get_property(window, atoms.XdndProxy, Some(atoms.WINDOW), 1)?
        .and_then(|prop| prop.first_u32())
    {
        if let Some(verify) = backend
            .get_property(proxy, atoms.XdndProxy, Some(atoms.WINDOW), 1)?
            .and_then(|prop| prop.first_u32())
        {
            if proxy == verify {
                return Ok(Some(proxy));
            }
        }
        trace!(window, proxy, "Ignoring unverified XdndProxy");
    }

    Ok(None)
}

fn interacts_with<B: WindowSystem + ?Sized>(
    backend: &mut B,
    window: X11Window,
    kind: ShapeKind,
    point: Point<i32, Local>,
) -> Result<Option<bool>, BackendError> {
    Ok(backend
        .shape_rectangles(window, kind)?
        .map(|rects| rects.iter().any(|rect| rect.contains(point))))
}

/// Walks the window tree below `window` front-to-back for the innermost window containing `point`
///
/// `point` is relative to the parent of `window`. If `strict` is set, only XdndAware windows
/// qualify, otherwise the innermost window containing the point is returned if no aware window
/// is found below it. The drag icon window and anything below it are never returned.
pub fn find_real_window<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    icon: Option<X11Window>,
    point: Point<i32, Local>,
    window: X11Window,
    depth: u32,
    strict: bool,
) -> Result<Option<X11Window>, BackendError> {
    if icon == Some(window) || depth == 0 {
        return Ok(None);
    }

    let Some(geometry) = backend.window_geometry(window)? else {
        return Ok(None);
    };
    if !geometry.viewable || !geometry.rect.contains(point) {
        return Ok(None);
    }

    let relative = point - geometry.rect.loc;
    let mut contains_pointer = !strict;
    if is_aware(backend, atoms, window)? {
        // an unset shape reports the window outline, so both kinds need to be checked
        let input = interacts_with(backend, window, ShapeKind::Input, relative)?;
        contains_pointer = input.unwrap_or(true);
        let bounding = if contains_pointer {
            interacts_with(backend, window, ShapeKind::Bounding, relative)?
        } else {
            None
        };
        contains_pointer &= bounding.unwrap_or(true);

        if contains_pointer {
            return Ok(Some(window));
        }
    }

    for child in backend.children(window)?.into_iter().rev() {
        if let Some(found) = find_real_window(backend, atoms, icon, relative, child, depth - 1, strict)? {
            return Ok(Some(found));
        }
    }

    Ok(contains_pointer.then_some(window))
}

/// Find the window a drag at `point` should be sent to
///
/// Follows the chain of children under the pointer for the first XdndAware window, falling back
/// to [`find_real_window`], first strict, then lenient. `None` means the pointer is over the
/// root window itself.
pub fn find_aware_target<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    icon: Option<X11Window>,
    root: X11Window,
    point: Point<i32, Root>,
    max_depth: u32,
) -> Result<Option<X11Window>, BackendError> {
    let root_point = point.to_local(Point::default());
    let Some(translated) = backend.translate_coordinates(root, root, root_point)? else {
        return Ok(None);
    };
    let Some(mut target) = translated.child.filter(|child| *child != root) else {
        return Ok(None);
    };

    let mut src = root;
    let mut pos = translated.point;
    let found = loop {
        trace!(target, "Checking target for XdndAware");
        let Some(translated) = backend.translate_coordinates(src, target, pos)? else {
            break None;
        };
        pos = translated.point;
        src = target;

        if is_aware(backend, atoms, target)? {
            trace!(target, "Found XdndAware window");
            break Some(target);
        }
        match translated.child {
            Some(child) => target = child,
            None => break None,
        }
    };

    match found {
        Some(target) if Some(target) != icon => Ok(Some(target)),
        _ => {
            trace!("Searching for the real window under the pointer");
            let found = match find_real_window(backend, atoms, icon, root_point, root, max_depth, true)? {
                Some(window) => Some(window),
                None => find_real_window(backend, atoms, icon, root_point, root, max_depth, false)?,
            };
            trace!(?found, "Real window search done");
            Ok(found)
        }
    }
}

/// Closest XdndAware window among `window` and its ancestors
pub fn find_aware_ancestor<B: WindowSystem + ?Sized>(
    backend: &mut B,
    atoms: &Atoms,
    mut window: X11Window,
) -> Result<Option<X11Window>, BackendError> {
    loop {
        if is_aware(backend, atoms, window)? {
            return Ok(Some(window));
        }
        match backend.parent(window)? {
            Some(parent) => window = parent,
            None => return Ok(None),
        }
    }
}
