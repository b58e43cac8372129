//! The execution engine. Instead of recursing for each nested term, the engine keeps its state on
//! explicit stacks, so deeply nested AML can't exhaust the kernel stack:
//!
//! - the *context* stack has an entry for each method invocation, and for each scope being
//!   populated;
//! - the *block* stack has the window of bytecode that each construct is decoded from;
//! - the *item* stack has the constructs that are part-way through being executed;
//! - the *operand* stack has the operands that those constructs have gathered so far.
//!
//! [`Executor::process`] advances the top item by one step. Usually that means calling
//! [`Executor::parse`] to decode the next term, which pushes either an operand or a new item.

use crate::{
    name_object::starts_name_string,
    namespace::{AmlHandle, AmlName, MethodCode, NamespaceNode, NodeObject, NodeType},
    object::Variable,
    opcode::{AmlStream, Opcode},
    AmlError,
    Interpreter,
};
use alloc::{sync::Arc, vec::Vec};
use core::mem;
use log::{trace, warn};
use spinning_top::Spinlock;

pub const MAX_ARGS: usize = 7;
pub const MAX_LOCALS: usize = 8;

/// The value of the `Revision` opcode.
const INTERPRETER_REVISION: u64 = 2;

/// The frame of a single call to an AML control method.
pub struct Invocation {
    pub args: Spinlock<[Variable; MAX_ARGS]>,
    pub locals: Spinlock<[Variable; MAX_LOCALS]>,
    /// Nodes created while the method runs. They're removed from the namespace when it returns.
    pub(crate) created: Spinlock<Vec<AmlHandle>>,
}

impl Invocation {
    pub fn new(args: &[Variable]) -> Invocation {
        Invocation {
            args: Spinlock::new(core::array::from_fn(|i| args.get(i).cloned().unwrap_or_default())),
            locals: Spinlock::new(Default::default()),
            created: Spinlock::new(Vec::new()),
        }
    }
}

struct Context {
    code: Arc<[u8]>,
    scope: AmlHandle,
    invocation: Option<Arc<Invocation>>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Block {
    pub pc: usize,
    pub limit: usize,
}

impl Block {
    pub fn at_end(&self) -> bool {
        self.pc >= self.limit
    }
}

/// How `parse` should treat the next term.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ParseMode {
    /// Package elements. Names are kept as they are, to be resolved when they're used.
    Data,
    /// Operands that are used for their value. Names are resolved, and methods invoked.
    Object,
    /// Statements. Methods are invoked, but nothing is pushed.
    Exec,
    /// Names of objects that are about to be created.
    Unresolved,
    /// Targets, and operands that refer to an object rather than its value.
    Reference,
    /// As `Reference`, but names that don't exist produce a null operand.
    OptionalReference,
    ImmediateByte,
    ImmediateWord,
    ImmediateDWord,
}

impl ParseMode {
    pub fn wants_result(self) -> bool {
        self != ParseMode::Exec
    }

    pub fn resolves(self) -> bool {
        matches!(self, ParseMode::Object | ParseMode::Exec | ParseMode::Reference | ParseMode::OptionalReference)
    }

    pub fn invokes(self) -> bool {
        matches!(self, ParseMode::Object | ParseMode::Exec)
    }

    pub fn is_reference(self) -> bool {
        matches!(self, ParseMode::Reference | ParseMode::OptionalReference)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Operand {
    Object(Variable),
    Unresolved { scope: AmlHandle, name: AmlName },
    Resolved(AmlHandle),
    Arg(usize),
    Local(usize),
    Debug,
    /// An omitted target, or an optional reference to a name that doesn't exist.
    Null,
}

impl Operand {
    pub fn object(&self) -> Result<&Variable, AmlError> {
        match self {
            Operand::Object(object) => Ok(object),
            _ => Err(AmlError::UnexpectedResult),
        }
    }

    pub fn integer(&self) -> Result<u64, AmlError> {
        self.object()?.implicit_integer()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum LoopState {
    Predicate,
    Body,
}

/// An item of the work stack. `frame` is the height of the operand stack when the item was pushed,
/// so the item's operands are everything above it.
#[derive(Clone, Copy, Debug)]
pub(crate) enum StackItem {
    /// Populating a scope: owns a context and a block.
    Populate,
    /// Running a control method: owns a context and a block.
    Method { want_result: bool },
    Buffer { frame: usize, want_result: bool },
    /// `elements` is `None` until the size has been parsed and the package created.
    Package { frame: usize, variable: bool, elements: Option<usize>, want_result: bool },
    /// A declaration that creates a node once its operands have been gathered.
    Node { opcode: Opcode, modes: &'static [ParseMode], frame: usize },
    Op { opcode: Opcode, modes: &'static [ParseMode], frame: usize, want_result: bool },
    /// A method call. The method's handle is the first operand, followed by its arguments.
    Invoke { frame: usize, argc: usize, want_result: bool },
    Return { frame: usize },
    Loop { frame: usize, state: LoopState, predicate_pc: usize },
    Cond { frame: usize, state: LoopState, else_block: Option<Block> },
    BankField { frame: usize, region: AmlHandle, bank: AmlHandle },
}

pub(crate) struct Executor<'a> {
    pub interpreter: &'a Interpreter,
    contexts: Vec<Context>,
    pub blocks: Vec<Block>,
    pub stack: Vec<StackItem>,
    pub operands: Vec<Operand>,
}

impl<'a> Executor<'a> {
    pub fn new(interpreter: &'a Interpreter) -> Executor<'a> {
        Executor { interpreter, contexts: Vec::new(), blocks: Vec::new(), stack: Vec::new(), operands: Vec::new() }
    }

    /// Execute the top-level terms of `code[start..]`, installing what they declare into `scope`.
    pub fn populate(mut self, code: Arc<[u8]>, start: usize, scope: AmlHandle) -> Result<(), AmlError> {
        let limit = code.len();
        self.contexts.push(Context { code, scope, invocation: None });
        self.blocks.push(Block { pc: start, limit });
        self.stack.push(StackItem::Populate);
        self.run()
    }

    /// Run an AML method to completion and return its result.
    pub fn call(
        mut self,
        method: AmlHandle,
        table: Arc<[u8]>,
        start: usize,
        end: usize,
        args: &[Variable],
    ) -> Result<Variable, AmlError> {
        self.enter_method(method, table, start, end, args, true);
        self.run()?;
        match self.operands.pop() {
            Some(Operand::Object(result)) => Ok(result),
            _ => Err(AmlError::UnexpectedResult),
        }
    }

    fn run(&mut self) -> Result<(), AmlError> {
        while !self.stack.is_empty() {
            if let Err(err) = self.process() {
                self.unwind();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Throw away all of the state of a failed evaluation. Nodes that the aborted methods created
    /// are removed, just as if they'd returned.
    fn unwind(&mut self) {
        while let Some(context) = self.contexts.pop() {
            if let Some(invocation) = context.invocation {
                self.remove_created(&invocation);
            }
        }
        self.blocks.clear();
        self.stack.clear();
        self.operands.clear();
    }

    /*
     * Accessors for the tops of the stacks.
     */

    fn context(&self) -> Result<&Context, AmlError> {
        self.contexts.last().ok_or(AmlError::ExecutionFailure)
    }

    pub fn scope(&self) -> Result<AmlHandle, AmlError> {
        Ok(self.context()?.scope)
    }

    pub fn code(&self) -> Result<Arc<[u8]>, AmlError> {
        Ok(self.context()?.code.clone())
    }

    pub fn invocation(&self) -> Result<Arc<Invocation>, AmlError> {
        self.context()?.invocation.clone().ok_or_else(|| {
            warn!("Arguments and locals can only be used inside a control method");
            AmlError::ExecutionFailure
        })
    }

    pub fn block(&self) -> Result<Block, AmlError> {
        self.blocks.last().copied().ok_or(AmlError::ExecutionFailure)
    }

    pub fn block_mut(&mut self) -> Result<&mut Block, AmlError> {
        self.blocks.last_mut().ok_or(AmlError::ExecutionFailure)
    }

    pub fn set_pc(&mut self, pc: usize) -> Result<(), AmlError> {
        self.block_mut()?.pc = pc;
        Ok(())
    }

    pub fn replace_item(&mut self, item: StackItem) {
        if let Some(top) = self.stack.last_mut() {
            *top = item;
        }
    }

    pub fn push_value(&mut self, mode: ParseMode, value: Variable) {
        if mode.wants_result() {
            self.operands.push(Operand::Object(value));
        }
    }

    pub fn pop_object(&mut self) -> Result<Variable, AmlError> {
        match self.operands.pop() {
            Some(Operand::Object(object)) => Ok(object),
            _ => Err(AmlError::UnexpectedResult),
        }
    }

    /// Enter a nested scope, such as the body of a `Device`, which is executed as a `TermList`.
    pub fn push_scope(&mut self, scope: AmlHandle, start: usize, end: usize) -> Result<(), AmlError> {
        let context = self.context()?;
        let context = Context { code: context.code.clone(), scope, invocation: context.invocation.clone() };
        self.contexts.push(context);
        self.blocks.push(Block { pc: start, limit: end });
        self.stack.push(StackItem::Populate);
        Ok(())
    }

    fn enter_method(
        &mut self,
        method: AmlHandle,
        table: Arc<[u8]>,
        start: usize,
        end: usize,
        args: &[Variable],
        want_result: bool,
    ) {
        let invocation = Arc::new(Invocation::new(args));
        self.contexts.push(Context { code: table, scope: method, invocation: Some(invocation) });
        self.blocks.push(Block { pc: start, limit: end });
        self.stack.push(StackItem::Method { want_result });
    }

    /// Tear down the context of the method on top of the stack. Its `Method` item must already have
    /// been popped.
    pub fn leave_method(&mut self, result: Option<Variable>) {
        self.blocks.pop();
        if let Some(invocation) = self.contexts.pop().and_then(|context| context.invocation) {
            self.remove_created(&invocation);
        }
        if let Some(result) = result {
            self.operands.push(Operand::Object(result));
        }
    }

    fn remove_created(&self, invocation: &Invocation) {
        let created = mem::take(&mut *invocation.created.lock());
        let mut namespace = self.interpreter.namespace.lock();
        for handle in created.into_iter().rev() {
            // Children of a removed scope have already gone with it.
            if namespace.get(handle).is_none() {
                continue;
            }
            if let Err(err) = namespace.uninstall(handle) {
                warn!("Failed to remove method-local node {:?}: {:?}", handle, err);
            }
        }
    }

    /// Install a new node called `name`, relative to `scope`. Nodes created by a running method
    /// are recorded on its invocation.
    pub fn install_node(
        &mut self,
        scope: AmlHandle,
        name: &AmlName,
        object: NodeObject,
    ) -> Result<AmlHandle, AmlError> {
        let handle = {
            let mut namespace = self.interpreter.namespace.lock();
            let (parent, seg) = namespace.resolve_new(scope, name)?;
            namespace.install(NamespaceNode::new(seg, object), parent).map_err(|err| {
                warn!("Failed to create {}: {:?}", name, err);
                err
            })?
        };

        if let Some(invocation) = self.context()?.invocation.as_ref() {
            invocation.created.lock().push(handle);
        }
        Ok(handle)
    }

    /// Advance the item on top of the work stack by one step.
    pub fn process(&mut self) -> Result<(), AmlError> {
        let Some(&item) = self.stack.last() else { return Ok(()) };

        match item {
            StackItem::Populate => {
                if self.block()?.at_end() {
                    self.blocks.pop();
                    self.contexts.pop();
                    self.stack.pop();
                    Ok(())
                } else {
                    self.parse(ParseMode::Exec)
                }
            }

            StackItem::Method { want_result } => {
                if self.block()?.at_end() {
                    // Falling off the end of a method returns zero
                    self.stack.pop();
                    self.leave_method(want_result.then_some(Variable::Integer(0)));
                    Ok(())
                } else {
                    self.parse(ParseMode::Exec)
                }
            }

            StackItem::Buffer { frame, want_result } => {
                if self.operands.len() == frame {
                    return self.parse(ParseMode::Object);
                }

                let size = self.pop_object()?.implicit_integer()? as usize;
                let block = self.block()?;
                let code = self.code()?;
                let initializer = &code[block.pc..block.limit];
                let mut bytes = initializer.to_vec();
                if bytes.len() > size {
                    warn!("Buffer initializer ({} bytes) is longer than the buffer ({} bytes)", bytes.len(), size);
                } else {
                    bytes.resize(size, 0);
                }

                self.blocks.pop();
                self.stack.pop();
                if want_result {
                    self.operands.push(Operand::Object(Variable::buffer_from(bytes)));
                }
                Ok(())
            }

            StackItem::Package { frame, variable, elements, want_result } => {
                let Some(index) = elements else {
                    if self.operands.len() == frame {
                        return self.parse(if variable { ParseMode::Object } else { ParseMode::ImmediateByte });
                    }
                    let size = self.pop_object()?.implicit_integer()? as usize;
                    self.operands.push(Operand::Object(Variable::new_package(size)));
                    self.replace_item(StackItem::Package { frame, variable, elements: Some(0), want_result });
                    return Ok(());
                };

                if self.operands.len() == frame + 2 {
                    let element = self.pop_object()?;
                    let package = self.operands[frame].object()?;
                    if index < package.package_len()? {
                        package.package_set(index, element)?;
                    } else {
                        warn!("Package has more elements than its declared size, ignoring element {}", index);
                    }
                    self.replace_item(StackItem::Package { frame, variable, elements: Some(index + 1), want_result });
                    return Ok(());
                }

                if self.block()?.at_end() {
                    self.blocks.pop();
                    self.stack.pop();
                    if !want_result {
                        self.operands.pop();
                    }
                    Ok(())
                } else {
                    self.parse(ParseMode::Data)
                }
            }

            StackItem::Node { opcode, modes, frame } => {
                let parsed = self.operands.len() - frame;
                if parsed < modes.len() {
                    return self.parse(modes[parsed]);
                }

                let operands = self.operands.split_off(frame);
                self.stack.pop();
                self.reduce_node(opcode, operands)
            }

            StackItem::Op { opcode, modes, frame, want_result } => {
                let parsed = self.operands.len() - frame;
                if parsed < modes.len() {
                    return self.parse(modes[parsed]);
                }

                let operands = self.operands.split_off(frame);
                self.stack.pop();
                let result = self.reduce_op(opcode, operands)?;
                if want_result {
                    self.operands.push(Operand::Object(result));
                }
                Ok(())
            }

            StackItem::Invoke { frame, argc, want_result } => {
                if self.operands.len() < frame + 1 + argc {
                    return self.parse(ParseMode::Object);
                }

                let mut operands = self.operands.split_off(frame).into_iter();
                let Some(Operand::Resolved(method)) = operands.next() else { panic!() };
                let args = operands
                    .map(|operand| match operand {
                        Operand::Object(object) => Ok(object),
                        _ => Err(AmlError::UnexpectedResult),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self.stack.pop();
                self.invoke(method, &args, want_result)
            }

            StackItem::Return { frame } => self.process_return(frame),
            StackItem::Loop { frame, state, predicate_pc } => self.process_loop(frame, state, predicate_pc),
            StackItem::Cond { frame, state, else_block } => self.process_cond(frame, state, else_block),
            StackItem::BankField { frame, region, bank } => self.process_bank_field(frame, region, bank),
        }
    }

    fn invoke(&mut self, method: AmlHandle, args: &[Variable], want_result: bool) -> Result<(), AmlError> {
        let code = {
            let namespace = self.interpreter.namespace.lock();
            match &namespace.node(method)?.object {
                NodeObject::Method { code, .. } => code.clone(),
                _ => return Err(AmlError::TypeMismatch),
            }
        };

        match code {
            MethodCode::Native(native) => {
                let result = native(args).map_err(|err| {
                    warn!("Native method {:?} failed: {:?}", method, err);
                    AmlError::ExecutionFailure
                })?;
                if want_result {
                    self.operands.push(Operand::Object(result));
                }
                Ok(())
            }
            MethodCode::Aml { table, start, end } => {
                self.enter_method(method, table, start, end, args, want_result);
                Ok(())
            }
        }
    }

    /// Decode a single term from the current block, in the given mode.
    pub fn parse(&mut self, mode: ParseMode) -> Result<(), AmlError> {
        let code = self.code()?;
        let scope = self.scope()?;
        let block = self.block()?;
        let mut stream = AmlStream::new(&code, block.pc, block.limit);

        match mode {
            ParseMode::ImmediateByte | ParseMode::ImmediateWord | ParseMode::ImmediateDWord => {
                let value = match mode {
                    ParseMode::ImmediateByte => u64::from(stream.next()?),
                    ParseMode::ImmediateWord => u64::from(stream.next_u16()?),
                    _ => u64::from(stream.next_u32()?),
                };
                self.set_pc(stream.pc())?;
                self.operands.push(Operand::Object(Variable::Integer(value)));
                return Ok(());
            }
            _ => (),
        }

        if starts_name_string(stream.peek()?) {
            let name = stream.namestring()?;
            self.set_pc(stream.pc())?;
            return self.parse_name(scope, name, mode);
        }

        let opcode_pc = stream.pc();
        let opcode = stream.opcode()?;
        trace!("{:#x}: {:?} ({:?})", opcode_pc, opcode, mode);

        match opcode {
            Opcode::Zero if mode.is_reference() => {
                self.set_pc(stream.pc())?;
                self.operands.push(Operand::Null);
                Ok(())
            }
            Opcode::Zero | Opcode::One | Opcode::Ones | Opcode::Revision | Opcode::Timer => {
                self.set_pc(stream.pc())?;
                let value = match opcode {
                    Opcode::Zero => 0,
                    Opcode::One => 1,
                    Opcode::Ones => u64::MAX,
                    Opcode::Revision => INTERPRETER_REVISION,
                    _ => self.interpreter.handler.timer()?,
                };
                self.push_constant(opcode, mode, Variable::Integer(value));
                Ok(())
            }
            Opcode::BytePrefix | Opcode::WordPrefix | Opcode::DWordPrefix | Opcode::QWordPrefix => {
                let value = match opcode {
                    Opcode::BytePrefix => u64::from(stream.next()?),
                    Opcode::WordPrefix => u64::from(stream.next_u16()?),
                    Opcode::DWordPrefix => u64::from(stream.next_u32()?),
                    _ => stream.next_u64()?,
                };
                self.set_pc(stream.pc())?;
                self.push_constant(opcode, mode, Variable::Integer(value));
                Ok(())
            }
            Opcode::StringPrefix => {
                let string = stream.string()?;
                self.set_pc(stream.pc())?;
                self.push_constant(opcode, mode, Variable::new_string(string));
                Ok(())
            }

            /*
             * DefBuffer := BufferOp PkgLength BufferSize ByteList
             */
            Opcode::Buffer => {
                let end = stream.pkg_end()?;
                self.set_pc(end)?;
                self.blocks.push(Block { pc: stream.pc(), limit: end });
                self.stack.push(StackItem::Buffer { frame: self.operands.len(), want_result: mode.wants_result() });
                Ok(())
            }

            /*
             * DefPackage := PackageOp PkgLength NumElements PackageElementList
             * DefVarPackage := VarPackageOp PkgLength VarNumElements PackageElementList
             */
            Opcode::Package | Opcode::VarPackage => {
                let end = stream.pkg_end()?;
                self.set_pc(end)?;
                self.blocks.push(Block { pc: stream.pc(), limit: end });
                self.stack.push(StackItem::Package {
                    frame: self.operands.len(),
                    variable: opcode == Opcode::VarPackage,
                    elements: None,
                    want_result: mode.wants_result(),
                });
                Ok(())
            }

            Opcode::Arg(index) => {
                self.set_pc(stream.pc())?;
                self.parse_arg(index as usize, mode)
            }
            Opcode::Local(index) => {
                self.set_pc(stream.pc())?;
                self.parse_local(index as usize, mode)
            }
            Opcode::Debug => {
                self.set_pc(stream.pc())?;
                self.parse_debug(mode);
                Ok(())
            }

            Opcode::If
            | Opcode::Else
            | Opcode::While
            | Opcode::Continue
            | Opcode::Break
            | Opcode::Return
            | Opcode::Noop
            | Opcode::Breakpoint => self.parse_statement(opcode, stream),

            Opcode::Name
            | Opcode::Alias
            | Opcode::Scope
            | Opcode::Method
            | Opcode::External
            | Opcode::Mutex
            | Opcode::Event
            | Opcode::Device
            | Opcode::Processor
            | Opcode::PowerRes
            | Opcode::ThermalZone
            | Opcode::OpRegion
            | Opcode::DataRegion
            | Opcode::Field
            | Opcode::IndexField
            | Opcode::BankField
            | Opcode::CreateBitField
            | Opcode::CreateByteField
            | Opcode::CreateWordField
            | Opcode::CreateDWordField
            | Opcode::CreateQWordField
            | Opcode::CreateField => self.parse_term_object(opcode, stream),

            Opcode::Load | Opcode::LoadTable => {
                warn!("{:?} is not supported", opcode);
                Err(AmlError::Unsupported)
            }

            opcode => {
                let Some(modes) = crate::expression::op_modes(opcode) else {
                    panic!("Unexpected opcode {:?} at {:#x}", opcode, opcode_pc);
                };
                self.set_pc(stream.pc())?;
                self.stack.push(StackItem::Op {
                    opcode,
                    modes,
                    frame: self.operands.len(),
                    want_result: mode.wants_result(),
                });
                Ok(())
            }
        }
    }

    fn push_constant(&mut self, opcode: Opcode, mode: ParseMode, value: Variable) {
        if mode == ParseMode::Exec {
            warn!("{:?} has no effect when executed as a statement", opcode);
        }
        self.push_value(mode, value);
    }

    fn parse_name(&mut self, scope: AmlHandle, name: AmlName, mode: ParseMode) -> Result<(), AmlError> {
        if mode == ParseMode::Data {
            self.operands.push(Operand::Object(Variable::UnresolvedName { scope, name }));
            return Ok(());
        }
        if !mode.resolves() {
            self.operands.push(Operand::Unresolved { scope, name });
            return Ok(());
        }

        let resolved = {
            let namespace = self.interpreter.namespace.lock();
            namespace.resolve(scope, &name).map(|handle| {
                let handle = namespace.resolve_alias(handle);
                let argc = match namespace.get(handle).map(|node| &node.object) {
                    Some(NodeObject::Method { flags, .. }) => Some(flags.arg_count()),
                    _ => None,
                };
                (handle, argc)
            })
        };

        let Some((handle, argc)) = resolved else {
            if mode == ParseMode::OptionalReference {
                self.operands.push(Operand::Null);
                return Ok(());
            }
            let path = self.interpreter.namespace.lock().path_of(scope);
            warn!("Undefined reference to {} in scope {}", name, path);
            return Err(AmlError::NoSuchNode);
        };

        if !mode.invokes() {
            self.operands.push(Operand::Resolved(handle));
            return Ok(());
        }

        match argc {
            Some(argc) => {
                let frame = self.operands.len();
                self.stack.push(StackItem::Invoke { frame, argc, want_result: mode.wants_result() });
                self.operands.push(Operand::Resolved(handle));
            }
            None => {
                let value = self.load_node(handle)?;
                self.push_value(mode, value);
            }
        }
        Ok(())
    }

    pub fn node_type(&self, handle: AmlHandle) -> Option<NodeType> {
        self.interpreter.namespace.lock().node_type(handle)
    }
}

#[cfg(test)]
mod tests {
    use crate::{object::Variable, test_utils::*, AmlError};

    #[test]
    fn method_under_system_bus() {
        // Scope(\_SB) { Method(TST, 1) { If (LEqual(Arg0, One)) { Return (0x2A) } Return (Zero) } }
        let body = aml![pkg(0xa0, &[0x93, 0x68, 0x01, 0xa4, 0x0a, 0x2a]), [0xa4, 0x00]];
        let interpreter = populated(&pkg(0x10, &aml![[0x5c], *b"_SB_", method("TST_", 1, &body)]));

        assert_eq!(interpreter.eval_path("\\_SB.TST", &[Variable::Integer(1)]).unwrap().as_integer(), Ok(42));
        assert_eq!(interpreter.eval_path("\\_SB.TST", &[Variable::Integer(0)]).unwrap().as_integer(), Ok(0));
        assert_eq!(interpreter.eval_path("\\TST", &[]).err(), Some(AmlError::NoSuchNode));
    }

    #[test]
    fn nested_scopes_find_method_locals() {
        let body = aml![
            [0x08], *b"LOC0", [0x0a, 0x07], // Name(LOC0, 7)
            // Device(SUB0) { Store(LOC0, Local0); Method(GET0) { Return (LOC0) } }
            ext_pkg(0x82, &aml![*b"SUB0", [0x70], *b"LOC0", [0x60], method("GET0", 0, &aml![[0xa4], *b"LOC0"])]),
            // Return (Add(Local0, SUB0.GET0()))
            [0xa4, 0x72, 0x60, 0x2e], *b"SUB0", *b"GET0", [0x00],
        ];
        let interpreter = populated(&method("MAIN", 0, &body));

        assert_eq!(interpreter.eval_path("\\MAIN", &[]).unwrap().as_integer(), Ok(14));
        assert_eq!(interpreter.namespace.lock().lookup("\\MAIN.SUB0"), Err(AmlError::NoSuchNode));
        assert_eq!(interpreter.namespace.lock().lookup("\\MAIN.LOC0"), Err(AmlError::NoSuchNode));
    }

    #[test]
    fn method_locals_are_removed_after_every_call() {
        // Device(DEV0) { Name(VAL0, Arg0) } Return (DEV0.VAL0)
        let body = aml![
            ext_pkg(0x82, &aml![*b"DEV0", [0x08], *b"VAL0", [0x68]]),
            [0xa4, 0x2e], *b"DEV0", *b"VAL0",
        ];
        let interpreter = populated(&method("MAIN", 1, &body));

        for value in [3, 9] {
            assert_eq!(interpreter.eval_path("\\MAIN", &[Variable::Integer(value)]).unwrap().as_integer(), Ok(value));
            let namespace = interpreter.namespace.lock();
            let main = namespace.lookup("\\MAIN").unwrap();
            assert_eq!(namespace.children(main).count(), 0);
        }
    }
}
