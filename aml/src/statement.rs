use crate::{
    exec::{Block, Executor, LoopState, ParseMode, StackItem},
    opcode::{AmlStream, Opcode},
    AmlError,
};
use log::{debug, warn};

const ELSE_OP: u8 = 0xa1;

impl Executor<'_> {
    pub(crate) fn parse_statement(&mut self, opcode: Opcode, mut stream: AmlStream<'_>) -> Result<(), AmlError> {
        match opcode {
            /*
             * DefIfElse := IfOp PkgLength Predicate TermList DefElse
             * DefElse := Nothing | <ElseOp PkgLength TermList>
             */
            Opcode::If => {
                let if_end = stream.pkg_end()?;
                let body_start = stream.pc();

                let code = self.code()?;
                let mut after = AmlStream::new(&code, if_end, stream.limit());
                let else_block = match after.peek() {
                    Ok(ELSE_OP) => {
                        after.next()?;
                        let else_end = after.pkg_end()?;
                        Some(Block { pc: after.pc(), limit: else_end })
                    }
                    _ => None,
                };

                self.set_pc(else_block.map_or(if_end, |block| block.limit))?;
                self.blocks.push(Block { pc: body_start, limit: if_end });
                let frame = self.operands.len();
                self.stack.push(StackItem::Cond { frame, state: LoopState::Predicate, else_block });
                Ok(())
            }
            Opcode::Else => {
                warn!("Else without a matching If");
                Err(AmlError::UnexpectedResult)
            }

            /*
             * DefWhile := WhileOp PkgLength Predicate TermList
             */
            Opcode::While => {
                let end = stream.pkg_end()?;
                self.set_pc(end)?;
                self.blocks.push(Block { pc: stream.pc(), limit: end });
                self.stack.push(StackItem::Loop {
                    frame: self.operands.len(),
                    state: LoopState::Predicate,
                    predicate_pc: stream.pc(),
                });
                Ok(())
            }

            Opcode::Break => {
                self.set_pc(stream.pc())?;
                self.pop_conditionals()?;
                // Leave the loop altogether
                self.stack.pop();
                self.blocks.pop();
                Ok(())
            }
            Opcode::Continue => {
                self.set_pc(stream.pc())?;
                let StackItem::Loop { frame, predicate_pc, .. } = self.pop_conditionals()? else { panic!() };
                self.set_pc(predicate_pc)?;
                self.replace_item(StackItem::Loop { frame, state: LoopState::Predicate, predicate_pc });
                Ok(())
            }

            /*
             * DefReturn := ReturnOp ArgObject
             */
            Opcode::Return => {
                self.set_pc(stream.pc())?;
                self.stack.push(StackItem::Return { frame: self.operands.len() });
                Ok(())
            }

            Opcode::Noop => self.set_pc(stream.pc()),
            Opcode::Breakpoint => {
                debug!("Breakpoint at {:#x}", stream.pc() - 1);
                self.set_pc(stream.pc())
            }

            _ => panic!("{:?} is not a statement", opcode),
        }
    }

    /// Pop the `If`s enclosing a `Break` or `Continue`, up to the innermost `While`, which is left on
    /// top of the stack.
    fn pop_conditionals(&mut self) -> Result<StackItem, AmlError> {
        loop {
            match self.stack.last() {
                Some(StackItem::Cond { .. }) => {
                    self.stack.pop();
                    self.blocks.pop();
                }
                Some(item @ StackItem::Loop { .. }) => return Ok(*item),
                _ => {
                    warn!("Break or Continue outside of a While");
                    return Err(AmlError::UnexpectedResult);
                }
            }
        }
    }

    pub(crate) fn process_loop(&mut self, frame: usize, state: LoopState, predicate_pc: usize) -> Result<(), AmlError> {
        match state {
            LoopState::Predicate => {
                if self.operands.len() == frame {
                    return self.parse(ParseMode::Object);
                }

                if self.pop_object()?.implicit_integer()? != 0 {
                    self.replace_item(StackItem::Loop { frame, state: LoopState::Body, predicate_pc });
                } else {
                    self.stack.pop();
                    self.blocks.pop();
                }
                Ok(())
            }
            LoopState::Body => {
                if self.block()?.at_end() {
                    self.set_pc(predicate_pc)?;
                    self.replace_item(StackItem::Loop { frame, state: LoopState::Predicate, predicate_pc });
                    Ok(())
                } else {
                    self.parse(ParseMode::Exec)
                }
            }
        }
    }

    pub(crate) fn process_cond(
        &mut self,
        frame: usize,
        state: LoopState,
        else_block: Option<Block>,
    ) -> Result<(), AmlError> {
        match state {
            LoopState::Predicate => {
                if self.operands.len() == frame {
                    return self.parse(ParseMode::Object);
                }

                if self.pop_object()?.implicit_integer()? != 0 {
                    self.replace_item(StackItem::Cond { frame, state: LoopState::Body, else_block });
                } else if let Some(else_block) = else_block {
                    *self.block_mut()? = else_block;
                    self.replace_item(StackItem::Cond { frame, state: LoopState::Body, else_block: None });
                } else {
                    self.stack.pop();
                    self.blocks.pop();
                }
                Ok(())
            }
            LoopState::Body => {
                if self.block()?.at_end() {
                    self.stack.pop();
                    self.blocks.pop();
                    Ok(())
                } else {
                    self.parse(ParseMode::Exec)
                }
            }
        }
    }

    pub(crate) fn process_return(&mut self, frame: usize) -> Result<(), AmlError> {
        if self.operands.len() == frame {
            return self.parse(ParseMode::Object);
        }

        let value = self.pop_object()?;
        self.stack.pop();
        loop {
            match self.stack.pop() {
                Some(StackItem::Loop { .. } | StackItem::Cond { .. }) => {
                    self.blocks.pop();
                }
                Some(StackItem::Method { want_result }) => {
                    self.leave_method(want_result.then(|| value.deep_clone()));
                    return Ok(());
                }
                _ => {
                    warn!("Return outside of a control method");
                    return Err(AmlError::UnexpectedResult);
                }
            }
        }
    }
}
