use crate::{
    name_object::NameSeg,
    object::{MethodFlags, ObjectType, SharedBytes, Variable},
    op_region::{FieldUnit, OpRegion, RegionHandler},
    sync::SyncState,
    AmlError,
};
use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};
use core::fmt;
use log::{debug, warn};

/// A handle refers to a node of the namespace without borrowing it. Handles are never reused: the
/// handle of a removed node will never point to a new node, so handles cached by the library
/// consumer can't silently start referring to something else.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct AmlHandle(u32);

impl AmlHandle {
    fn increment(&mut self) {
        self.0 += 1;
    }
}

/// A host-provided implementation of a control method. It's called with the method's arguments.
pub type NativeMethod = Arc<dyn Fn(&[Variable]) -> Result<Variable, AmlError> + Send + Sync>;
/// Called when AML executes `Notify` on a node, with the node and the notification value.
pub type NotifyOverride = Arc<dyn Fn(AmlHandle, u64) + Send + Sync>;

#[derive(Clone)]
pub enum MethodCode {
    /// The method's body is `table[start..end]`.
    Aml { table: Arc<[u8]>, start: usize, end: usize },
    Native(NativeMethod),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeType {
    Root,
    Name,
    Alias,
    Method,
    Device,
    Mutex,
    Event,
    Processor,
    PowerResource,
    ThermalZone,
    OpRegion,
    Field,
    IndexField,
    BankField,
    BufferField,
}

pub enum NodeObject {
    Root,
    Name(Variable),
    Alias(AmlHandle),
    Method { code: MethodCode, flags: MethodFlags },
    Device,
    Mutex(Arc<SyncState>),
    Event(Arc<SyncState>),
    Processor { id: u8, pblk_address: u32, pblk_length: u8 },
    PowerResource { system_level: u8, resource_order: u16 },
    ThermalZone,
    OpRegion { region: OpRegion, handler: Option<Arc<dyn RegionHandler>> },
    Field(FieldUnit),
    BufferField { buffer: SharedBytes, bit_offset: u64, bit_length: u64 },
}

impl NodeObject {
    pub fn typ(&self) -> NodeType {
        match self {
            NodeObject::Root => NodeType::Root,
            NodeObject::Name(_) => NodeType::Name,
            NodeObject::Alias(_) => NodeType::Alias,
            NodeObject::Method { .. } => NodeType::Method,
            NodeObject::Device => NodeType::Device,
            NodeObject::Mutex(_) => NodeType::Mutex,
            NodeObject::Event(_) => NodeType::Event,
            NodeObject::Processor { .. } => NodeType::Processor,
            NodeObject::PowerResource { .. } => NodeType::PowerResource,
            NodeObject::ThermalZone => NodeType::ThermalZone,
            NodeObject::OpRegion { .. } => NodeType::OpRegion,
            NodeObject::Field(field) => field.node_type(),
            NodeObject::BufferField { .. } => NodeType::BufferField,
        }
    }

    /// The type `ObjectType` reports for a node. Names report the type of their value.
    pub fn object_type(&self) -> ObjectType {
        match self {
            NodeObject::Root => ObjectType::Device,
            NodeObject::Name(object) => object.object_type(),
            NodeObject::Alias(_) => ObjectType::Reference,
            NodeObject::Method { .. } => ObjectType::Method,
            NodeObject::Device => ObjectType::Device,
            NodeObject::Mutex(_) => ObjectType::Mutex,
            NodeObject::Event(_) => ObjectType::Event,
            NodeObject::Processor { .. } => ObjectType::Processor,
            NodeObject::PowerResource { .. } => ObjectType::PowerResource,
            NodeObject::ThermalZone => ObjectType::ThermalZone,
            NodeObject::OpRegion { .. } => ObjectType::OpRegion,
            NodeObject::Field(_) => ObjectType::FieldUnit,
            NodeObject::BufferField { .. } => ObjectType::BufferField,
        }
    }
}

impl fmt::Debug for NodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeObject::Name(object) => write!(f, "Name({:?})", object),
            NodeObject::Alias(target) => write!(f, "Alias({:?})", target),
            NodeObject::Method { code: MethodCode::Aml { start, end, .. }, flags } => {
                write!(f, "Method({} args, {:#x}..{:#x})", flags.arg_count(), start, end)
            }
            NodeObject::Method { code: MethodCode::Native(_), flags } => {
                write!(f, "Method({} args, native)", flags.arg_count())
            }
            NodeObject::Processor { id, .. } => write!(f, "Processor({})", id),
            NodeObject::OpRegion { region, handler } => {
                write!(f, "{:?}{}", region, if handler.is_some() { " (overridden)" } else { "" })
            }
            NodeObject::Field(field) => write!(f, "{:?}", field),
            NodeObject::BufferField { bit_offset, bit_length, .. } => {
                write!(f, "BufferField({}, {})", bit_offset, bit_length)
            }
            other => write!(f, "{:?}", other.typ()),
        }
    }
}

pub struct NamespaceNode {
    pub name: NameSeg,
    pub parent: Option<AmlHandle>,
    children: BTreeMap<NameSeg, AmlHandle>,
    pub object: NodeObject,
    pub notify_override: Option<NotifyOverride>,
}

impl NamespaceNode {
    pub fn new(name: NameSeg, object: NodeObject) -> NamespaceNode {
        NamespaceNode { name, parent: None, children: BTreeMap::new(), object, notify_override: None }
    }
}

pub struct Namespace {
    /// This is a running count of handles, which are never reused.
    next_handle: AmlHandle,
    nodes: BTreeMap<AmlHandle, NamespaceNode>,
    root: AmlHandle,
}

impl Namespace {
    /// Create a namespace containing the root and the predefined objects: the `\_SB`, `\_SI`,
    /// `\_GPE`, `\_PR` and `\_TZ` scopes, the global lock `\_GL`, and the OS identification
    /// methods `\_OSI`, `\_OS` and `\_REV`.
    pub fn new() -> Namespace {
        let root = AmlHandle(0);
        let mut namespace = Namespace { next_handle: AmlHandle(1), nodes: BTreeMap::new(), root };
        namespace.nodes.insert(root, NamespaceNode::new(NameSeg(*b"\\___"), NodeObject::Root));

        for name in [b"_SB_", b"_SI_", b"_GPE", b"_PR_", b"_TZ_"] {
            namespace.install_predefined(*name, NodeObject::Device);
        }
        namespace.install_predefined(*b"_GL_", NodeObject::Mutex(Arc::new(SyncState::new())));
        namespace.install_predefined(
            *b"_OSI",
            NodeObject::Method { code: MethodCode::Native(Arc::new(osi_method)), flags: MethodFlags(1) },
        );
        namespace.install_predefined(
            *b"_OS_",
            NodeObject::Method { code: MethodCode::Native(Arc::new(os_method)), flags: MethodFlags(0) },
        );
        namespace.install_predefined(
            *b"_REV",
            NodeObject::Method { code: MethodCode::Native(Arc::new(rev_method)), flags: MethodFlags(0) },
        );

        namespace
    }

    fn install_predefined(&mut self, name: [u8; 4], object: NodeObject) {
        let node = NamespaceNode::new(NameSeg(name), object);
        if let Err(err) = self.install(node, self.root) {
            warn!("Failed to install predefined object {:?}: {:?}", NameSeg(name), err);
        }
    }

    pub fn root(&self) -> AmlHandle {
        self.root
    }

    pub fn get(&self, handle: AmlHandle) -> Option<&NamespaceNode> {
        self.nodes.get(&handle)
    }

    pub fn get_mut(&mut self, handle: AmlHandle) -> Option<&mut NamespaceNode> {
        self.nodes.get_mut(&handle)
    }

    pub fn node(&self, handle: AmlHandle) -> Result<&NamespaceNode, AmlError> {
        self.nodes.get(&handle).ok_or(AmlError::NoSuchNode)
    }

    pub fn node_mut(&mut self, handle: AmlHandle) -> Result<&mut NamespaceNode, AmlError> {
        self.nodes.get_mut(&handle).ok_or(AmlError::NoSuchNode)
    }

    /// Link `node` into the namespace as a child of `parent`, returning its new handle.
    pub fn install(&mut self, mut node: NamespaceNode, parent: AmlHandle) -> Result<AmlHandle, AmlError> {
        let parent_node = self.nodes.get(&parent).ok_or(AmlError::NoSuchNode)?;
        if parent_node.children.contains_key(&node.name) {
            let mut path = self.path_of(parent);
            path.0.push(NameComponent::Segment(node.name));
            return Err(AmlError::NameCollision(path));
        }

        let handle = self.next_handle;
        self.next_handle.increment();

        node.parent = Some(parent);
        let name = node.name;
        self.nodes.insert(handle, node);
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.insert(name, handle);
        }

        Ok(handle)
    }

    /// Remove a node, and everything below it, from the namespace. The nodes' payloads are dropped,
    /// which releases any buffers they keep alive.
    pub fn uninstall(&mut self, handle: AmlHandle) -> Result<(), AmlError> {
        if handle == self.root {
            return Err(AmlError::IllegalArguments);
        }
        let node = self.nodes.remove(&handle).ok_or(AmlError::NoSuchNode)?;
        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.remove(&node.name);
        }

        let mut to_remove: Vec<AmlHandle> = node.children.values().copied().collect();
        while let Some(child) = to_remove.pop() {
            if let Some(child) = self.nodes.remove(&child) {
                to_remove.extend(child.children.values().copied());
            }
        }

        Ok(())
    }

    pub fn parent(&self, handle: AmlHandle) -> Option<AmlHandle> {
        self.nodes.get(&handle).and_then(|node| node.parent)
    }

    pub fn child(&self, handle: AmlHandle, name: NameSeg) -> Option<AmlHandle> {
        self.nodes.get(&handle).and_then(|node| node.children.get(&name).copied())
    }

    pub fn children(&self, handle: AmlHandle) -> impl Iterator<Item = AmlHandle> + '_ {
        self.nodes.get(&handle).into_iter().flat_map(|node| node.children.values().copied())
    }

    /// Resolve `name` relative to `scope`. Names made of a single segment are searched for in
    /// `scope`, and then in each enclosing scope up to the root (the search rules of ยง5.3 of the
    /// ACPI specification). Other names are resolved directly.
    pub fn resolve(&self, scope: AmlHandle, name: &AmlName) -> Option<AmlHandle> {
        if name.search_rules_apply() {
            let seg = name.0[0].as_segment()?;
            let mut current = Some(scope);
            while let Some(level) = current {
                if let Some(handle) = self.child(level, seg) {
                    return Some(handle);
                }
                current = self.parent(level);
            }
            return None;
        }

        let mut current = scope;
        for component in &name.0 {
            current = match component {
                NameComponent::Root => self.root,
                NameComponent::Prefix => self.parent(current)?,
                NameComponent::Segment(seg) => self.child(current, *seg)?,
            };
        }
        self.nodes.contains_key(&current).then_some(current)
    }

    /// Work out where a node called `name`, declared in `scope`, should be installed. Returns the
    /// parent and the node's own name segment. Search rules never apply here.
    pub fn resolve_new(&self, scope: AmlHandle, name: &AmlName) -> Result<(AmlHandle, NameSeg), AmlError> {
        let (last, prefix) = name.0.split_last().ok_or(AmlError::EmptyNamesAreInvalid)?;
        let seg = last.as_segment().ok_or(AmlError::InvalidName(Some(name.clone())))?;

        let mut parent = scope;
        for component in prefix {
            parent = match component {
                NameComponent::Root => Some(self.root),
                NameComponent::Prefix => self.parent(parent),
                NameComponent::Segment(seg) => self.child(parent, *seg),
            }
            .ok_or(AmlError::NoSuchNode)?;
        }
        Ok((parent, seg))
    }

    pub fn resolve_path(&self, scope: AmlHandle, path: &str) -> Result<AmlHandle, AmlError> {
        let name = AmlName::from_str(path)?;
        self.resolve(scope, &name).ok_or(AmlError::NoSuchNode)
    }

    /// Look up an absolute path, such as `\_SB.PCI0`.
    pub fn lookup(&self, path: &str) -> Result<AmlHandle, AmlError> {
        self.resolve_path(self.root, path)
    }

    /// Follow a chain of aliases to the node it eventually refers to.
    pub fn resolve_alias(&self, mut handle: AmlHandle) -> AmlHandle {
        // Aliases can't refer to aliases that haven't been declared yet, so this terminates.
        while let Some(NodeObject::Alias(target)) = self.nodes.get(&handle).map(|node| &node.object) {
            handle = *target;
        }
        handle
    }

    pub fn node_type(&self, handle: AmlHandle) -> Option<NodeType> {
        self.nodes.get(&self.resolve_alias(handle)).map(|node| node.object.typ())
    }

    /// Find the next node of type `typ` after `after`, in a pre-order walk of the namespace.
    /// Passing `None` starts the walk from the root.
    pub fn next_of_type(&self, after: Option<AmlHandle>, typ: NodeType) -> Option<AmlHandle> {
        let mut seen_start = after.is_none();
        let mut stack = vec![self.root];
        while let Some(handle) = stack.pop() {
            let node = self.nodes.get(&handle)?;
            if seen_start && node.object.typ() == typ {
                return Some(handle);
            }
            if Some(handle) == after {
                seen_start = true;
            }
            // Push in reverse so children are visited in name order.
            stack.extend(node.children.values().rev().copied());
        }
        None
    }

    /// Iterate over all the devices of the namespace.
    pub fn devices(&self) -> impl Iterator<Item = AmlHandle> + '_ {
        let mut last = None;
        core::iter::from_fn(move || {
            last = self.next_of_type(last, NodeType::Device);
            last
        })
    }

    /// Get the absolute path of a node.
    pub fn path_of(&self, handle: AmlHandle) -> AmlName {
        let mut segments = Vec::new();
        let mut current = handle;
        while current != self.root {
            match self.nodes.get(&current) {
                Some(node) => {
                    segments.push(NameComponent::Segment(node.name));
                    current = node.parent.unwrap_or(self.root);
                }
                None => break,
            }
        }
        segments.push(NameComponent::Root);
        segments.reverse();
        AmlName(segments)
    }

    pub fn set_notify_override(&mut self, handle: AmlHandle, handler: NotifyOverride) -> Result<(), AmlError> {
        self.node_mut(handle)?.notify_override = Some(handler);
        Ok(())
    }

    /// Replace the body of a method with a native implementation.
    pub fn set_method_override(&mut self, handle: AmlHandle, method: NativeMethod) -> Result<(), AmlError> {
        match &mut self.node_mut(handle)?.object {
            NodeObject::Method { code, .. } => {
                *code = MethodCode::Native(method);
                Ok(())
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }

    /// Route all accesses to an operation region through `region_handler`.
    pub fn set_region_override(
        &mut self,
        handle: AmlHandle,
        region_handler: Arc<dyn RegionHandler>,
    ) -> Result<(), AmlError> {
        match &mut self.node_mut(handle)?.object {
            NodeObject::OpRegion { handler, .. } => {
                *handler = Some(region_handler);
                Ok(())
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace::new()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const INDENT_PER_LEVEL: usize = 4;

        fn print_level(
            namespace: &Namespace,
            f: &mut fmt::Formatter<'_>,
            handle: AmlHandle,
            indent: usize,
        ) -> fmt::Result {
            let Some(node) = namespace.nodes.get(&handle) else { return Ok(()) };
            if handle == namespace.root {
                writeln!(f, "\\:")?;
            } else {
                writeln!(f, "{:indent$}{}: {:?}", "", node.name.as_str(), node.object, indent = indent)?;
            }

            for &child in node.children.values() {
                print_level(namespace, f, child, indent + INDENT_PER_LEVEL)?;
            }
            Ok(())
        }

        print_level(self, f, self.root, 0)
    }
}

const SUPPORTED_OSI_STRINGS: &[&str] = &[
    "Windows 2000",
    "Windows 2001",
    "Windows 2001 SP1",
    "Windows 2001.1",
    "Windows 2006",
    "Windows 2006.1",
    "Windows 2006 SP1",
    "Windows 2006 SP2",
    "Windows 2009",
    "Windows 2012",
    "Windows 2013",
    "Windows 2015",
];

fn osi_method(args: &[Variable]) -> Result<Variable, AmlError> {
    let query = args.first().ok_or(AmlError::IllegalArguments)?.bytes()?;
    let supported = SUPPORTED_OSI_STRINGS.iter().any(|s| s.as_bytes() == &query[..]);
    if !supported && &query[..] == b"Linux" {
        warn!("Firmware requested _OSI(\"Linux\"), ignoring");
    }

    let result = if supported { 0xffff_ffff } else { 0 };
    debug!("_OSI({:?}) returned {:#x}", String::from_utf8_lossy(&query), result);
    Ok(Variable::Integer(result))
}

fn os_method(_args: &[Variable]) -> Result<Variable, AmlError> {
    Ok(Variable::new_string(b"Microsoft Windows NT"))
}

fn rev_method(_args: &[Variable]) -> Result<Variable, AmlError> {
    Ok(Variable::Integer(2))
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct AmlName(pub(crate) Vec<NameComponent>);

impl AmlName {
    pub fn root() -> AmlName {
        AmlName(vec![NameComponent::Root])
    }

    pub fn from_name_seg(seg: NameSeg) -> AmlName {
        AmlName(vec![NameComponent::Segment(seg)])
    }

    pub fn from_components(components: Vec<NameComponent>) -> AmlName {
        AmlName(components)
    }

    /// Convert a string representation of an AML name into an `AmlName`.
    pub fn from_str(mut string: &str) -> Result<AmlName, AmlError> {
        if string.is_empty() {
            return Err(AmlError::EmptyNamesAreInvalid);
        }

        let mut components = Vec::new();

        // If it starts with a \, make it an absolute name
        if string.starts_with('\\') {
            components.push(NameComponent::Root);
            string = &string[1..];
        }

        if !string.is_empty() {
            // Divide the rest of it into segments, and parse those
            for mut part in string.split('.') {
                // Handle prefix chars
                while part.starts_with('^') {
                    components.push(NameComponent::Prefix);
                    part = &part[1..];
                }

                components.push(NameComponent::Segment(NameSeg::from_str(part)?));
            }
        }

        Ok(AmlName(components))
    }

    pub fn as_string(&self) -> String {
        self.0
            .iter()
            .fold(String::new(), |name, component| match component {
                NameComponent::Root => name + "\\",
                NameComponent::Prefix => name + "^",
                NameComponent::Segment(seg) => name + seg.as_str() + ".",
            })
            .trim_end_matches('.')
            .to_string()
    }

    /// `NullName`s decode to an empty `AmlName`.
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.0.first() == Some(&NameComponent::Root)
    }

    /// Special rules apply when searching for certain paths (specifically, those that are made up
    /// of a single name segment). Returns `true` if those rules apply.
    pub fn search_rules_apply(&self) -> bool {
        matches!(&self.0[..], [NameComponent::Segment(_)])
    }
}

impl fmt::Display for AmlName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum NameComponent {
    Root,
    Prefix,
    Segment(NameSeg),
}

impl NameComponent {
    pub fn as_segment(self) -> Option<NameSeg> {
        match self {
            NameComponent::Segment(seg) => Some(seg),
            NameComponent::Root | NameComponent::Prefix => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(name: &str) -> NameSeg {
        NameSeg::from_str(name).unwrap()
    }

    fn name(path: &str) -> AmlName {
        AmlName::from_str(path).unwrap()
    }

    #[test]
    fn test_aml_name_from_str() {
        assert_eq!(AmlName::from_str(""), Err(AmlError::EmptyNamesAreInvalid));
        assert_eq!(AmlName::from_str("\\"), Ok(AmlName::root()));
        assert_eq!(
            AmlName::from_str("\\_SB.PCI0"),
            Ok(AmlName(vec![
                NameComponent::Root,
                NameComponent::Segment(NameSeg(*b"_SB_")),
                NameComponent::Segment(NameSeg(*b"PCI0"))
            ]))
        );
        assert_eq!(
            AmlName::from_str("^^FOO"),
            Ok(AmlName(vec![NameComponent::Prefix, NameComponent::Prefix, NameComponent::Segment(seg("FOO"))]))
        );
        assert_eq!(name("\\_SB.PCI0").as_string(), "\\_SB_.PCI0");
    }

    #[test]
    fn test_search_rules_apply() {
        assert!(!AmlName::root().search_rules_apply());
        assert!(!name("\\_SB").search_rules_apply());
        assert!(!name("^VWX").search_rules_apply());
        assert!(name("_SB").search_rules_apply());
        assert!(!name("_SB.PCI0").search_rules_apply());
    }

    #[test]
    fn predefined_objects() {
        let namespace = Namespace::new();
        for path in ["\\_SB", "\\_GPE", "\\_PR", "\\_TZ", "\\_SI", "\\_GL", "\\_OSI", "\\_OS", "\\_REV"] {
            assert!(namespace.lookup(path).is_ok(), "{} is missing", path);
        }
        assert_eq!(namespace.node_type(namespace.lookup("\\_GL").unwrap()), Some(NodeType::Mutex));
    }

    #[test]
    fn install_and_resolve() {
        let mut namespace = Namespace::new();
        let sb = namespace.lookup("\\_SB").unwrap();
        let pci0 = namespace.install(NamespaceNode::new(seg("PCI0"), NodeObject::Device), sb).unwrap();
        let adr =
            namespace.install(NamespaceNode::new(seg("_ADR"), NodeObject::Name(Variable::Integer(0))), pci0).unwrap();
        let foo = namespace.install(NamespaceNode::new(seg("FOO"), NodeObject::Name(Variable::None)), sb).unwrap();

        assert_eq!(namespace.lookup("\\_SB.PCI0._ADR"), Ok(adr));
        assert_eq!(namespace.resolve(pci0, &name("_ADR")), Some(adr));
        // Search rules walk up to `\_SB`
        assert_eq!(namespace.resolve(pci0, &name("FOO")), Some(foo));
        // But not for multi-segment names
        assert_eq!(namespace.resolve(pci0, &name("PCI0._ADR")), None);
        assert_eq!(namespace.resolve(pci0, &name("^PCI0._ADR")), Some(adr));
        assert_eq!(namespace.resolve(adr, &name("^^FOO")), Some(foo));
        assert_eq!(namespace.resolve(pci0, &name("BAR")), None);

        assert_eq!(namespace.path_of(adr), name("\\_SB.PCI0._ADR"));
        assert_eq!(namespace.resolve_new(pci0, &name("^BAR")), Ok((sb, seg("BAR"))));
        assert_eq!(namespace.resolve_new(pci0, &name("XYZ.BAR")), Err(AmlError::NoSuchNode));

        assert!(matches!(
            namespace.install(NamespaceNode::new(seg("FOO"), NodeObject::Device), sb),
            Err(AmlError::NameCollision(_))
        ));
    }

    #[test]
    fn uninstall_removes_subtree() {
        let mut namespace = Namespace::new();
        let sb = namespace.lookup("\\_SB").unwrap();
        let dev = namespace.install(NamespaceNode::new(seg("DEV0"), NodeObject::Device), sb).unwrap();
        let child = namespace.install(NamespaceNode::new(seg("CHLD"), NodeObject::Device), dev).unwrap();

        namespace.uninstall(dev).unwrap();
        assert!(namespace.get(dev).is_none());
        assert!(namespace.get(child).is_none());
        assert_eq!(namespace.lookup("\\_SB.DEV0"), Err(AmlError::NoSuchNode));
        assert_eq!(namespace.uninstall(dev), Err(AmlError::NoSuchNode));

        // Handles are never reused
        let again = namespace.install(NamespaceNode::new(seg("DEV0"), NodeObject::Device), sb).unwrap();
        assert_ne!(again, dev);
    }

    #[test]
    fn aliases_and_iteration() {
        let mut namespace = Namespace::new();
        let sb = namespace.lookup("\\_SB").unwrap();
        let dev_a = namespace.install(NamespaceNode::new(seg("DEVA"), NodeObject::Device), sb).unwrap();
        let dev_b = namespace.install(NamespaceNode::new(seg("DEVB"), NodeObject::Device), dev_a).unwrap();
        let alias = namespace.install(NamespaceNode::new(seg("ALS0"), NodeObject::Alias(dev_b)), sb).unwrap();

        assert_eq!(namespace.resolve_alias(alias), dev_b);
        assert_eq!(namespace.node_type(alias), Some(NodeType::Device));

        let children: Vec<AmlHandle> = namespace.children(sb).collect();
        assert_eq!(children, vec![alias, dev_a]);

        let devices: Vec<AmlHandle> = namespace.devices().collect();
        assert!(devices.contains(&dev_a) && devices.contains(&dev_b));
        let after_a = devices.iter().position(|&d| d == dev_a).unwrap();
        assert_eq!(devices[after_a + 1], dev_b);
    }
}
