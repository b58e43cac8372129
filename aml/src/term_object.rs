//! Named objects and namespace modifiers: the terms that create nodes.

use crate::{
    exec::{Executor, Operand, ParseMode, StackItem},
    name_object::NameSeg,
    namespace::{AmlHandle, AmlName, MethodCode, NodeObject},
    object::{MethodFlags, Variable},
    op_region::{FieldFlags, FieldKind, FieldUnit, OpRegion, RegionSpace},
    opcode::{self, AmlStream, Opcode},
    sync::SyncState,
    AmlError,
};
use alloc::{sync::Arc, vec::Vec};
use log::{debug, trace, warn};

use ParseMode::{Object, Reference, Unresolved};

impl Executor<'_> {
    pub(crate) fn parse_term_object(&mut self, opcode: Opcode, mut stream: AmlStream<'_>) -> Result<(), AmlError> {
        let scope = self.scope()?;

        match opcode {
            /*
             * DefName := NameOp NameString DataRefObject
             */
            Opcode::Name => self.push_node(opcode, &[Unresolved, Object], stream.pc()),

            /*
             * DefAlias := AliasOp NameString NameString
             */
            Opcode::Alias => {
                let source = stream.namestring()?;
                let alias = stream.namestring()?;
                self.set_pc(stream.pc())?;

                let target = self.interpreter.namespace.lock().resolve(scope, &source);
                let Some(target) = target else {
                    warn!("Alias {} refers to {}, which does not exist", alias, source);
                    return Err(AmlError::NoSuchNode);
                };
                self.install_node(scope, &alias, NodeObject::Alias(target))?;
                Ok(())
            }

            /*
             * DefScope := ScopeOp PkgLength NameString TermList
             */
            Opcode::Scope => {
                let end = stream.pkg_end()?;
                let name = stream.namestring()?;
                let target = self.interpreter.namespace.lock().resolve(scope, &name);
                let Some(target) = target else {
                    warn!("Scope {} does not exist", name);
                    return Err(AmlError::NoSuchNode);
                };

                self.set_pc(end)?;
                self.push_scope(target, stream.pc(), end)
            }

            /*
             * DefDevice := DeviceOp PkgLength NameString TermList
             * DefThermalZone := ThermalZoneOp PkgLength NameString TermList
             * DefProcessor := ProcessorOp PkgLength NameString ProcID PblkAddr PblkLen TermList
             * DefPowerRes := PowerResOp PkgLength NameString SystemLevel ResourceOrder TermList
             */
            Opcode::Device | Opcode::ThermalZone | Opcode::Processor | Opcode::PowerRes => {
                let end = stream.pkg_end()?;
                let name = stream.namestring()?;
                let object = match opcode {
                    Opcode::Device => NodeObject::Device,
                    Opcode::ThermalZone => NodeObject::ThermalZone,
                    Opcode::Processor => NodeObject::Processor {
                        id: stream.next()?,
                        pblk_address: stream.next_u32()?,
                        pblk_length: stream.next()?,
                    },
                    _ => NodeObject::PowerResource { system_level: stream.next()?, resource_order: stream.next_u16()? },
                };
                let handle = self.install_node(scope, &name, object)?;

                self.set_pc(end)?;
                self.push_scope(handle, stream.pc(), end)
            }

            /*
             * DefMethod := MethodOp PkgLength NameString MethodFlags TermList
             */
            Opcode::Method => {
                let end = stream.pkg_end()?;
                let name = stream.namestring()?;
                let flags = MethodFlags(stream.next()?);
                let code = MethodCode::Aml { table: self.code()?, start: stream.pc(), end };
                self.install_node(scope, &name, NodeObject::Method { code, flags })?;
                self.set_pc(end)
            }

            /*
             * DefExternal := ExternalOp NameString ObjectType ArgumentCount
             */
            Opcode::External => {
                let name = stream.namestring()?;
                let object_type = stream.next()?;
                let arg_count = stream.next()?;
                debug!("External {} (type {}, {} args)", name, object_type, arg_count);
                self.set_pc(stream.pc())
            }

            /*
             * DefMutex := MutexOp NameString SyncFlags
             * DefEvent := EventOp NameString
             */
            Opcode::Mutex | Opcode::Event => {
                let name = stream.namestring()?;
                let state = Arc::new(SyncState::new());
                let object = if opcode == Opcode::Mutex {
                    // The sync level is only used to catch deadlocks, which we don't try to do
                    stream.next()?;
                    NodeObject::Mutex(state)
                } else {
                    NodeObject::Event(state)
                };
                self.set_pc(stream.pc())?;
                self.install_node(scope, &name, object)?;
                Ok(())
            }

            /*
             * DefOpRegion := OpRegionOp NameString RegionSpace RegionOffset RegionLen
             */
            Opcode::OpRegion => {
                self.push_node(opcode, &[Unresolved, ParseMode::ImmediateByte, Object, Object], stream.pc())
            }
            Opcode::DataRegion => {
                warn!("DataTableRegion is not supported");
                Err(AmlError::Unsupported)
            }

            /*
             * DefField := FieldOp PkgLength NameString FieldFlags FieldList
             */
            Opcode::Field => {
                let end = stream.pkg_end()?;
                let region = self.resolve_existing(scope, &stream.namestring()?)?;
                self.set_pc(end)?;
                self.parse_field_list(scope, FieldKind::Normal { region }, stream.pc(), end)
            }

            /*
             * DefIndexField := IndexFieldOp PkgLength NameString NameString FieldFlags FieldList
             */
            Opcode::IndexField => {
                let end = stream.pkg_end()?;
                let index = self.resolve_existing(scope, &stream.namestring()?)?;
                let data = self.resolve_existing(scope, &stream.namestring()?)?;
                self.set_pc(end)?;
                self.parse_field_list(scope, FieldKind::Index { index, data }, stream.pc(), end)
            }

            /*
             * DefBankField := BankFieldOp PkgLength NameString NameString BankValue FieldFlags FieldList
             *
             * The bank value is a `TermArg`, so it has to be evaluated before the field list can be
             * parsed.
             */
            Opcode::BankField => {
                let end = stream.pkg_end()?;
                let region = self.resolve_existing(scope, &stream.namestring()?)?;
                let bank = self.resolve_existing(scope, &stream.namestring()?)?;
                self.set_pc(end)?;
                self.blocks.push(crate::exec::Block { pc: stream.pc(), limit: end });
                self.stack.push(StackItem::BankField { frame: self.operands.len(), region, bank });
                Ok(())
            }

            /*
             * DefCreateBitField := CreateBitFieldOp SourceBuff BitIndex NameString
             * DefCreateByteField := CreateByteFieldOp SourceBuff ByteIndex NameString
             * (and the same for Word, DWord and QWord fields)
             * DefCreateField := CreateFieldOp SourceBuff BitIndex NumBits NameString
             */
            Opcode::CreateBitField
            | Opcode::CreateByteField
            | Opcode::CreateWordField
            | Opcode::CreateDWordField
            | Opcode::CreateQWordField => self.push_node(opcode, &[Reference, Object, Unresolved], stream.pc()),
            Opcode::CreateField => self.push_node(opcode, &[Reference, Object, Object, Unresolved], stream.pc()),

            _ => panic!("{:?} is not a named object", opcode),
        }
    }

    fn push_node(&mut self, opcode: Opcode, modes: &'static [ParseMode], pc: usize) -> Result<(), AmlError> {
        self.set_pc(pc)?;
        self.stack.push(StackItem::Node { opcode, modes, frame: self.operands.len() });
        Ok(())
    }

    fn resolve_existing(&self, scope: AmlHandle, name: &AmlName) -> Result<AmlHandle, AmlError> {
        let handle = self.interpreter.namespace.lock().resolve(scope, name);
        handle.ok_or_else(|| {
            warn!("Field refers to {}, which does not exist", name);
            AmlError::NoSuchNode
        })
    }

    pub(crate) fn process_bank_field(
        &mut self,
        frame: usize,
        region: AmlHandle,
        bank: AmlHandle,
    ) -> Result<(), AmlError> {
        if self.operands.len() == frame {
            return self.parse(Object);
        }

        let bank_value = self.pop_object()?.implicit_integer()?;
        let block = self.block()?;
        self.blocks.pop();
        self.stack.pop();
        self.parse_field_list(self.scope()?, FieldKind::Bank { region, bank, bank_value }, block.pc, block.limit)
    }

    /// Parse `FieldFlags FieldList` from `code[start..end]`, creating a field unit for each named
    /// field.
    fn parse_field_list(
        &mut self,
        scope: AmlHandle,
        kind: FieldKind,
        start: usize,
        end: usize,
    ) -> Result<(), AmlError> {
        let code = self.code()?;
        let mut stream = AmlStream::new(&code, start, end);
        let mut flags = FieldFlags(stream.next()?);

        /*
         * FieldList := Nothing | <FieldElement FieldList>
         * FieldElement := NamedField | ReservedField | AccessField | ExtendedAccessField |
         *                 ConnectField
         * NamedField := NameSeg PkgLength
         * ReservedField := 0x00 PkgLength
         * AccessField := 0x01 AccessType AccessAttrib
         * ConnectField := <0x02 NameString> | <0x02 BufferData>
         * ExtendedAccessField := 0x03 AccessType ExtendedAccessAttrib AccessLength
         *
         * The lengths of fields are encoded like `PkgLength`s, but are in bits.
         */
        let mut bit_offset = 0;
        while !stream.at_end() {
            match stream.peek()? {
                opcode::RESERVED_FIELD => {
                    stream.next()?;
                    bit_offset += stream.pkglength()? as u64;
                }
                opcode::ACCESS_FIELD => {
                    stream.next()?;
                    let access_type = stream.next()?;
                    let _access_attrib = stream.next()?;
                    flags = flags.with_access_type(access_type);
                }
                opcode::EXTENDED_ACCESS_FIELD => {
                    stream.next()?;
                    let access_type = stream.next()?;
                    let _access_attrib = stream.next()?;
                    let _access_length = stream.next()?;
                    flags = flags.with_access_type(access_type);
                }
                opcode::CONNECT_FIELD => {
                    warn!("ConnectField is not supported");
                    return Err(AmlError::Unsupported);
                }
                _ => {
                    let seg = NameSeg::from_bytes([stream.next()?, stream.next()?, stream.next()?, stream.next()?])?;
                    let bit_length = stream.pkglength()? as u64;
                    trace!("Field {:?}: offset {}, length {}", seg, bit_offset, bit_length);
                    let field = FieldUnit { kind, bit_offset, bit_length, flags };
                    self.install_node(scope, &AmlName::from_name_seg(seg), NodeObject::Field(field))?;
                    bit_offset += bit_length;
                }
            }
        }
        Ok(())
    }

    /// Create the node for a declaration, once all of its operands have been gathered.
    pub(crate) fn reduce_node(&mut self, opcode: Opcode, operands: Vec<Operand>) -> Result<(), AmlError> {
        match opcode {
            Opcode::Name => {
                let [Operand::Unresolved { scope, name }, object] = &operands[..] else { panic!() };
                let object = object.object()?.deep_clone();
                self.install_node(*scope, name, NodeObject::Name(object))?;
            }

            Opcode::OpRegion => {
                let [Operand::Unresolved { scope, name }, space, base, length] = &operands[..] else { panic!() };
                let region = OpRegion {
                    space: RegionSpace::from(space.integer()? as u8),
                    base: base.integer()?,
                    length: length.integer()?,
                };
                trace!("OpRegion {}: {:?}", name, region);
                self.install_node(*scope, name, NodeObject::OpRegion { region, handler: None })?;
            }

            Opcode::CreateBitField
            | Opcode::CreateByteField
            | Opcode::CreateWordField
            | Opcode::CreateDWordField
            | Opcode::CreateQWordField => {
                let [source, index, Operand::Unresolved { scope, name }] = &operands[..] else { panic!() };
                let index = index.integer()?;
                let byte_offset = || index.checked_mul(8).ok_or(AmlError::OutOfBounds);
                let (bit_offset, bit_length) = match opcode {
                    Opcode::CreateBitField => (index, 1),
                    Opcode::CreateByteField => (byte_offset()?, 8),
                    Opcode::CreateWordField => (byte_offset()?, 16),
                    Opcode::CreateDWordField => (byte_offset()?, 32),
                    _ => (byte_offset()?, 64),
                };
                self.create_buffer_field(source, bit_offset, bit_length, *scope, name)?;
            }
            Opcode::CreateField => {
                let [source, index, length, Operand::Unresolved { scope, name }] = &operands[..] else { panic!() };
                let (bit_offset, bit_length) = (index.integer()?, length.integer()?);
                self.create_buffer_field(source, bit_offset, bit_length, *scope, name)?;
            }

            _ => panic!("{:?} does not create a node", opcode),
        }
        Ok(())
    }

    fn create_buffer_field(
        &mut self,
        source: &Operand,
        bit_offset: u64,
        bit_length: u64,
        scope: AmlHandle,
        name: &AmlName,
    ) -> Result<(), AmlError> {
        if bit_offset.checked_add(bit_length).is_none() {
            warn!("Buffer field {} ends beyond the addressable range", name);
            return Err(AmlError::OutOfBounds);
        }
        let Variable::Buffer(buffer) = self.read_operand(source)? else {
            warn!("Tried to create buffer field {} over something that isn't a buffer", name);
            return Err(AmlError::TypeMismatch);
        };
        self.install_node(scope, name, NodeObject::BufferField { buffer, bit_offset, bit_length })?;
        Ok(())
    }
}
