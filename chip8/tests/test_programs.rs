use std::time::Duration;

use chip8::{constants::*, prelude::*};
use proptest::prelude::*;

const NO_KEYS: KeyState = KeyState(0);

fn assemble(instrs: &[u16]) -> Vec<u8> {
    instrs.iter().flat_map(|instr| instr.to_be_bytes()).collect()
}

fn load(instrs: &[u16]) -> Chip8Vm {
    let mut vm = Chip8Vm::new(Chip8Conf {
        seed: Some(8),
        ..Default::default()
    });
    vm.load_bytecode(&assemble(instrs)).unwrap();
    vm
}

fn run(vm: &mut Chip8Vm, steps: usize) {
    for _ in 0..steps {
        vm.step(&NO_KEYS).unwrap();
    }
}

#[derive(Debug, Default)]
struct RecordingAudio(Vec<&'static str>);

impl AudioSink for RecordingAudio {
    fn play(&mut self) {
        self.0.push("play");
    }

    fn stop(&mut self) {
        self.0.push("stop");
    }
}

#[test]
fn test_clear_then_jump_to_self() {
    let mut vm = load(&[0x00E0, 0x1202]);
    assert!(vm.take_draw_flag());

    assert_eq!(vm.step(&NO_KEYS), Ok(Flow::Draw));
    assert!(vm.display_buffer().iter().all(|px| !px));
    assert!(vm.take_draw_flag());

    for _ in 0..3 {
        assert_eq!(vm.step(&NO_KEYS), Ok(Flow::Jump));
        assert_eq!(vm.cpu().pc(), 0x202);
        assert!(!vm.take_draw_flag(), "jump must not raise the draw flag");
    }
}

#[test]
fn test_jump_at_program_start() {
    let mut vm = load(&[0x00E0, 0x1200]);
    run(&mut vm, 2);
    assert_eq!(vm.cpu().pc(), 0x200);
    assert!(vm.cpu().draw_flag());
}

#[test]
fn test_add_immediate() {
    let mut vm = load(&[0x6A05, 0x7A06]);
    run(&mut vm, 2);
    assert_eq!(vm.cpu().v(0xA), 11);
    assert_eq!(vm.cpu().pc(), 0x204);
    assert_eq!(vm.cpu().v(0xF), 0);

    // no carry flag on wraparound
    let mut vm = load(&[0x6AFF, 0x7A02]);
    run(&mut vm, 2);
    assert_eq!(vm.cpu().v(0xA), 1);
    assert_eq!(vm.cpu().v(0xF), 0);
}

#[test]
fn test_return_on_empty_stack() {
    let mut vm = load(&[0x00EE]);
    assert_eq!(vm.step(&NO_KEYS), Err(Fault::StackUnderflow { pc: 0x200 }));
    assert_eq!(vm.cpu().pc(), 0x200);
    assert_eq!(vm.cpu().sp(), 0);

    // Faults are sticky, the driver decides what to do.
    assert_eq!(vm.step(&NO_KEYS), Err(Fault::StackUnderflow { pc: 0x200 }));
}

#[test]
fn test_flag_register_as_destination() {
    // LD vF, 0xFF; LD v1, 1; ADD vF, v1
    let mut vm = load(&[0x6FFF, 0x6101, 0x8F14]);
    run(&mut vm, 3);
    assert_eq!(vm.cpu().v(0xF), 1, "carry flag overrides the sum");
}

#[test]
fn test_logic_leaves_flag() {
    // LD vF, 7; LD v0, 0xF0; LD v1, 0x0F; OR; AND; XOR
    let mut vm = load(&[0x6F07, 0x60F0, 0x610F, 0x8011, 0x8012, 0x8013, 0x8010]);
    run(&mut vm, 4);
    assert_eq!(vm.cpu().v(0), 0xFF);
    run(&mut vm, 1);
    assert_eq!(vm.cpu().v(0), 0x0F);
    run(&mut vm, 1);
    assert_eq!(vm.cpu().v(0), 0x00);
    run(&mut vm, 1);
    assert_eq!(vm.cpu().v(0), 0x0F);
    assert_eq!(vm.cpu().v(0xF), 7);
}

#[test]
fn test_jump_offset() {
    // LD v0, 4; JP v0, 0x300
    let mut vm = load(&[0x6004, 0xB300]);
    run(&mut vm, 1);
    assert_eq!(vm.step(&NO_KEYS), Ok(Flow::Jump));
    assert_eq!(vm.cpu().pc(), 0x304);
}

#[test]
fn test_add_index() {
    // LD I, 0xFFF; LD v0, 2; ADD I, v0
    let mut vm = load(&[0xAFFF, 0x6002, 0xF01E]);
    run(&mut vm, 3);
    assert_eq!(vm.cpu().i(), 0x1001, "index register is not masked");
    assert_eq!(vm.cpu().v(0xF), 0);
}

#[test]
fn test_reset_is_idempotent() {
    let mut vm = load(&[
        0x6A05, // LD vA, 5
        0x7A06, // ADD vA, 6
        0xA300, // LD I, 0x300
        0xFA33, // LD B, vA
        0xFA15, // LD DT, vA
        0xFA18, // LD ST, vA
        0xF029, // LD F, v0
        0xD005, // DRW v0, v0, 5
        0x2214, // CALL 0x214
        0x0000,
        0xF10A, // LD v1, K
    ]);
    run(&mut vm, 10);
    assert_eq!(vm.cpu().sp(), 1);
    assert_eq!(vm.cpu().delay_timer(), 11);
    assert!(vm.is_waiting_for_key());
    assert!(vm.display_buffer().iter().any(|px| *px));

    vm.reset();
    let memory = *vm.cpu().memory();
    let registers = *vm.cpu().registers();
    let display = *vm.display_buffer();
    let pc = vm.cpu().pc();

    vm.reset();
    assert_eq!(vm.cpu().memory(), &memory);
    assert_eq!(vm.cpu().registers(), &registers);
    assert_eq!(vm.display_buffer(), &display);
    assert!(display.iter().all(|px| !*px));
    assert_eq!(vm.cpu().pc(), pc);
    assert_eq!(vm.cpu().i(), 0);
    assert_eq!(vm.cpu().sp(), 0);
    assert!(vm.cpu().stack().is_empty());
    assert_eq!(vm.cpu().delay_timer(), 0);
    assert_eq!(vm.cpu().sound_timer(), 0);
    assert!(!vm.is_waiting_for_key());
    assert!(!vm.is_sound_active());
    assert!(vm.take_draw_flag());
}

#[test]
fn test_load_too_large() {
    let mut vm = load(&[0x6A05]);
    let program = vec![0x12; MAX_PROGRAM_SIZE + 1];
    assert!(matches!(
        vm.load_bytecode(&program),
        Err(Chip8Error::LargeProgram { size }) if size == MAX_PROGRAM_SIZE + 1
    ));

    // Left in the reset state, the previous program is gone.
    assert!(vm.cpu().memory()[MEM_START..].iter().all(|b| *b == 0));
    assert_eq!(&vm.cpu().memory()[..FONTSET_DATA_LENGTH], &FONTSET[..]);
    assert_eq!(vm.cpu().pc(), 0x200);
}

#[test]
fn test_random_is_seeded() {
    let program: [u16; 4] = [0xC0FF, 0xC1FF, 0xC2FF, 0xC3FF];
    let mut a = load(&program);
    let mut b = load(&program);
    run(&mut a, 4);
    run(&mut b, 4);
    assert_eq!(a.cpu().registers(), b.cpu().registers());
}

#[test]
fn test_maze() {
    #[rustfmt::skip]
    let maze: &[u8] = &[
        0xA2, 0x1E, 0xC2, 0x01, 0x32, 0x01, 0xA2, 0x1A,
        0xD0, 0x14, 0x70, 0x04, 0x30, 0x40, 0x12, 0x00,
        0x60, 0x00, 0x71, 0x04, 0x31, 0x20, 0x12, 0x00,
        0x12, 0x18, 0x80, 0x40, 0x20, 0x10, 0x20, 0x40,
        0x80, 0x10,
    ];
    let mut vm = Chip8Vm::new(Chip8Conf::default());
    vm.load_bytecode(maze).unwrap();

    vm.run_steps(5000, &NO_KEYS).unwrap();

    // Program ends in an infinite loop once the screen is filled.
    assert_eq!(vm.cpu().pc(), 0x218);
    assert!(vm.display_buffer().iter().any(|px| *px));
    let dump = vm.dump_display().unwrap();
    assert!(dump.contains('#'));
}

#[test]
fn test_wait_for_key_and_draw_glyph() {
    // LD v0, K; LD F, v0; DRW v1, v1, 5
    let mut vm = load(&[0xF00A, 0xF029, 0xD115]);

    assert_eq!(vm.run_steps(10, &NO_KEYS).unwrap(), Flow::KeyWait);
    assert_eq!(vm.cpu().pc(), 0x200);

    let mut keys = [false; 16];
    keys[0x1] = true;
    vm.run_steps(3, &keys).unwrap();

    assert_eq!(vm.cpu().v(0), 1);
    // glyph "1" top row: 0x20
    assert!(vm.display_buffer()[2]);
    assert!(!vm.display_buffer()[0]);
}

#[test]
fn test_advance_timers() {
    // LD v0, 3; LD ST, v0
    let mut vm = load(&[0x6003, 0xF018]);
    run(&mut vm, 2);

    let mut audio = RecordingAudio::default();
    let frame = Duration::from_nanos(CLOCK_CYCLE_TIME);

    for _ in 0..5 {
        assert_eq!(vm.advance_timers(frame, &mut audio), 1);
    }
    assert_eq!(audio.0, ["play", "play", "stop"]);
    assert!(!vm.is_sound_active());

    // A slow frame catches up on several ticks.
    let mut vm = load(&[0x6003, 0xF018]);
    run(&mut vm, 2);
    assert_eq!(vm.advance_timers(frame * 2, &mut audio), 2);
    assert_eq!(vm.cpu().sound_timer(), 1);
}

#[test]
fn test_sixty_ticks() {
    // LD v0, 60; LD DT, v0; LD ST, v0
    let mut vm = load(&[0x603C, 0xF015, 0xF018]);
    run(&mut vm, 3);

    for _ in 0..59 {
        vm.tick();
        assert!(vm.cpu().delay_timer() > 0);
    }
    assert_eq!(vm.tick(), Tone::Stop);
    assert_eq!(vm.cpu().delay_timer(), 0);
    assert_eq!(vm.cpu().sound_timer(), 0);
}

proptest! {
    #[test]
    fn prop_load_round_trip(program in proptest::collection::vec(any::<u8>(), 0..=MAX_PROGRAM_SIZE)) {
        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&program).unwrap();
        prop_assert_eq!(&vm.cpu().memory()[MEM_START..MEM_START + program.len()], &program[..]);
    }

    #[test]
    fn prop_add_carry(a: u8, b: u8) {
        let mut vm = load(&[0x6100 | a as u16, 0x6200 | b as u16, 0x8124]);
        run(&mut vm, 3);
        prop_assert_eq!(vm.cpu().v(1), a.wrapping_add(b));
        prop_assert_eq!(vm.cpu().v(0xF), (a as u16 + b as u16 > 255) as u8);
    }

    #[test]
    fn prop_sub_borrow(a: u8, b: u8) {
        let mut vm = load(&[0x6100 | a as u16, 0x6200 | b as u16, 0x8125]);
        run(&mut vm, 3);
        prop_assert_eq!(vm.cpu().v(1), a.wrapping_sub(b));
        prop_assert_eq!(vm.cpu().v(0xF), (a >= b) as u8);

        let mut vm = load(&[0x6100 | a as u16, 0x6200 | b as u16, 0x8127]);
        run(&mut vm, 3);
        prop_assert_eq!(vm.cpu().v(1), b.wrapping_sub(a));
        prop_assert_eq!(vm.cpu().v(0xF), (b >= a) as u8);
    }

    #[test]
    fn prop_shift_out(a: u8, y: u8) {
        let mut vm = load(&[0x6100 | a as u16, 0x6200 | y as u16, 0x8126]);
        run(&mut vm, 3);
        prop_assert_eq!(vm.cpu().v(1), a >> 1);
        prop_assert_eq!(vm.cpu().v(0xF), a & 1);
        prop_assert_eq!(vm.cpu().v(2), y);

        let mut vm = load(&[0x6100 | a as u16, 0x6200 | y as u16, 0x812E]);
        run(&mut vm, 3);
        prop_assert_eq!(vm.cpu().v(1), a << 1);
        prop_assert_eq!(vm.cpu().v(0xF), a >> 7);
    }

    #[test]
    fn prop_draw_twice_restores(
        sprite in proptest::collection::vec(any::<u8>(), 1..=15),
        x in 0u16..=(DISPLAY_WIDTH - SPRITE_WIDTH) as u16,
        y_offset in 0u16..=16,
    ) {
        let n = sprite.len() as u16;
        let y = y_offset.min(DISPLAY_HEIGHT as u16 - n);
        let mut program = assemble(&[
            0x6000 | x,
            0x6100 | y,
            0xA210,
            0xD010 | n,
            0xD010 | n,
            0x120A,
            0x0000,
            0x0000,
        ]);
        program.extend_from_slice(&sprite);

        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&program).unwrap();
        run(&mut vm, 4);
        let lit = vm.display_buffer().iter().filter(|px| **px).count();
        let expected: u32 = sprite.iter().map(|row| row.count_ones()).sum();
        prop_assert_eq!(lit as u32, expected);
        prop_assert_eq!(vm.cpu().v(0xF), 0);

        run(&mut vm, 1);
        prop_assert!(vm.display_buffer().iter().all(|px| !px));
        prop_assert_eq!(vm.cpu().v(0xF), (expected > 0) as u8);
    }

    #[test]
    fn prop_store_load_round_trip(values in any::<[u8; 16]>(), x in 0usize..16) {
        let mut instrs: Vec<u16> = values
            .iter()
            .enumerate()
            .map(|(i, v)| 0x6000 | (i as u16) << 8 | *v as u16)
            .collect();
        let x16 = x as u16;
        instrs.push(0xA300);
        instrs.push(0xF055 | x16 << 8);
        instrs.extend((0..=x16).map(|i| 0x6000 | i << 8));
        instrs.push(0xA300);
        instrs.push(0xF065 | x16 << 8);

        let mut vm = load(&instrs);
        run(&mut vm, instrs.len());

        prop_assert_eq!(&vm.cpu().registers()[..=x], &values[..=x]);
        prop_assert_eq!(&vm.cpu().memory()[0x300..=0x300 + x], &values[..=x]);
        prop_assert_eq!(vm.cpu().i(), 0x300 + x16 + 1);
    }

    #[test]
    fn prop_timers_stop_at_zero(start in any::<u8>(), ticks in 0usize..400) {
        let mut vm = load(&[0x6000 | start as u16, 0xF015, 0xF018]);
        run(&mut vm, 3);

        for _ in 0..ticks {
            vm.tick();
        }

        let expected = (start as usize).saturating_sub(ticks) as u8;
        prop_assert_eq!(vm.cpu().delay_timer(), expected);
        prop_assert_eq!(vm.cpu().sound_timer(), expected);
        prop_assert_eq!(vm.is_sound_active(), expected > 0);
    }
}
