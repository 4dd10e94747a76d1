use super::*;
use crate::abi::NUM_ARG_REGS;
use crate::marshal::marshal_args;
use crate::types::Type;

/// Rebuild the register save areas and stack stream the entry stub would
/// capture from a marshaled staging buffer: integer words followed by the
/// stack continuation, and the float words separately.
fn capture(cif: &CallDescriptor, buf: &[u8]) -> (Vec<u64>, Vec<u64>) {
    let words = |bytes: &[u8]| -> Vec<u64> {
        bytes
            .chunks_exact(WORD_SIZE)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    };
    let reg_bytes = NUM_ARG_REGS * WORD_SIZE;
    let mut ar = words(&buf[..reg_bytes]);
    ar.extend(words(&buf[cif.stack_base()..]));
    let fpr = if cif.abi().has_fp_registers() {
        words(&buf[reg_bytes..2 * reg_bytes])
    } else {
        vec![0; NUM_ARG_REGS]
    };
    (ar, fpr)
}

struct Captured {
    values: Vec<Vec<u8>>,
    ret_write: Vec<u8>,
}

unsafe fn capture_handler(
    cif: &CallDescriptor,
    rvalue: *mut u8,
    avalues: &[*mut u8],
    user_data: *mut c_void,
) {
    let cap = &mut *(user_data as *mut Captured);
    for (ty, &p) in cif.args().iter().zip(avalues) {
        cap.values
            .push(core::slice::from_raw_parts(p, ty.size()).to_vec());
    }
    if !cap.ret_write.is_empty() {
        core::ptr::copy_nonoverlapping(cap.ret_write.as_ptr(), rvalue, cap.ret_write.len());
    }
}

/// Marshal the given values, replay them through the decoder, and return
/// the bytes each decoded argument presented to the handler.
fn round_trip(cif: &CallDescriptor, srcs: &[&[u8]]) -> Vec<Vec<u8>> {
    let mut buf = vec![0u8; cif.bytes()];
    let avalues: Vec<*const u8> = srcs.iter().map(|s| s.as_ptr()).collect();
    unsafe { marshal_args(cif, core::ptr::null_mut(), &avalues, &mut buf) };

    let (ar, fpr) = capture(cif, &buf);
    let mut cap = Captured { values: Vec::new(), ret_write: Vec::new() };
    let closure =
        Closure::new(cif, capture_handler, &mut cap as *mut Captured as *mut c_void).unwrap();
    let mut ret = [0u8; 16];
    unsafe { closure_inner(&closure, ret.as_mut_ptr(), ar.as_ptr(), fpr.as_ptr()) };
    cap.values
}

fn assert_round_trip(cif: &CallDescriptor, srcs: &[&[u8]]) {
    let decoded = round_trip(cif, srcs);
    assert_eq!(decoded.len(), srcs.len());
    for (i, (got, want)) in decoded.iter().zip(srcs).enumerate() {
        assert_eq!(got.as_slice(), *want, "argument {i} did not survive the round trip");
    }
}

#[test]
fn rejects_unsupported_abis() {
    let handler: ClosureHandler = capture_handler;
    for abi in [Abi::Rv32Single, Abi::Rv32Double, Abi::Rv32SoftFloat, Abi::Rv64SoftFloat] {
        let cif = CallDescriptor::new(abi, vec![], Type::void());
        let err = Closure::new(&cif, handler, core::ptr::null_mut()).unwrap_err();
        assert_eq!(err, PrepareClosureError::BadAbi(abi));
        assert!(err.to_string().contains("abi"));
    }
}

#[test]
fn accepts_rv64_hardware_float_abis() {
    let handler: ClosureHandler = capture_handler;
    for abi in [Abi::Rv64Single, Abi::Rv64Double] {
        let cif = CallDescriptor::new(abi, vec![], Type::void());
        assert!(Closure::new(&cif, handler, core::ptr::null_mut()).is_ok());
    }
}

#[test]
fn scalar_arguments_round_trip() {
    let args = vec![Type::sint8(), Type::uint16(), Type::sint32(), Type::uint64(), Type::pointer()];
    let cif = CallDescriptor::new(Abi::Rv64Double, args, Type::void());

    let a = (-5i8).to_le_bytes();
    let b = 0xbeefu16.to_le_bytes();
    let c = (-100_000i32).to_le_bytes();
    let d = 0x0102_0304_0506_0708u64.to_le_bytes();
    let p = 0x7fff_1234_5678u64.to_le_bytes();
    assert_round_trip(&cif, &[&a, &b, &c, &d, &p]);
}

#[test]
fn floats_round_trip_through_float_registers() {
    let args = vec![Type::sint32(), Type::double(), Type::float()];
    let cif = CallDescriptor::new(Abi::Rv64Double, args, Type::double());

    let a = 7i32.to_le_bytes();
    let b = 2.5f64.to_le_bytes();
    let c = (-1.5f32).to_le_bytes();
    assert_round_trip(&cif, &[&a, &b, &c]);
}

#[test]
fn float_pair_struct_round_trips() {
    let ty = Type::structure(vec![Type::float(), Type::float()]);
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![ty], Type::void());

    let mut value = [0u8; 8];
    value[..4].copy_from_slice(&1.5f32.to_le_bytes());
    value[4..].copy_from_slice(&(-3.25f32).to_le_bytes());
    assert_round_trip(&cif, &[&value]);
}

#[test]
fn double_pair_struct_round_trips() {
    let ty = Type::structure(vec![Type::double(), Type::double()]);
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![ty], Type::void());

    let mut value = [0u8; 16];
    value[..8].copy_from_slice(&6.25f64.to_le_bytes());
    value[8..].copy_from_slice(&(-0.125f64).to_le_bytes());
    assert_round_trip(&cif, &[&value]);
}

#[test]
fn mixed_float_int_struct_round_trips() {
    let ty = Type::structure(vec![Type::float(), Type::sint32()]);
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![ty], Type::void());

    let mut value = [0u8; 8];
    value[..4].copy_from_slice(&0.5f32.to_le_bytes());
    value[4..].copy_from_slice(&(-42i32).to_le_bytes());
    assert_round_trip(&cif, &[&value]);
}

#[test]
fn nested_struct_flattens_and_round_trips() {
    let inner = Type::structure(vec![Type::double()]);
    let ty = Type::structure(vec![Type::float(), inner]);
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![ty], Type::void());

    let mut value = [0u8; 16];
    value[..4].copy_from_slice(&9.75f32.to_le_bytes());
    value[8..].copy_from_slice(&(-2.0f64).to_le_bytes());
    assert_round_trip(&cif, &[&value]);
}

#[test]
fn ineligible_struct_round_trips_as_raw_words() {
    let ty = Type::structure(vec![Type::sint64(), Type::sint64()]);
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![ty], Type::void());

    let mut value = [0u8; 16];
    value[..8].copy_from_slice(&0x1111_2222_3333_4444u64.to_le_bytes());
    value[8..].copy_from_slice(&0x5555_6666_7777_8888u64.to_le_bytes());
    assert_round_trip(&cif, &[&value]);
}

#[test]
fn oversized_struct_round_trips_by_reference() {
    let big = Type::structure(vec![Type::uint64(); 5]);
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![Type::sint64(), big], Type::void());

    let a = 11i64.to_le_bytes();
    let mut data = [0u8; 40];
    for (i, chunk) in data.chunks_exact_mut(8).enumerate() {
        chunk.copy_from_slice(&((i as u64 + 1) * 0x1010).to_le_bytes());
    }
    assert_round_trip(&cif, &[&a, &data]);
}

#[test]
fn oversized_struct_past_register_file_round_trips() {
    let big = Type::structure(vec![Type::double(); 5]);
    let mut args = vec![Type::sint64(); 8];
    args.push(big);
    let cif = CallDescriptor::new(Abi::Rv64Double, args, Type::void());

    let ints: Vec<[u8; 8]> = (0..8).map(|i| (i as i64).to_le_bytes()).collect();
    let mut data = [0u8; 40];
    for (i, chunk) in data.chunks_exact_mut(8).enumerate() {
        chunk.copy_from_slice(&(i as f64 + 0.5).to_le_bytes());
    }
    let mut srcs: Vec<&[u8]> = ints.iter().map(|v| v.as_slice()).collect();
    srcs.push(&data);
    assert_round_trip(&cif, &srcs);
}

#[test]
fn stack_overflow_arguments_round_trip() {
    let args = vec![Type::sint64(); 11];
    let cif = CallDescriptor::new(Abi::Rv64Double, args, Type::void());

    let values: Vec<[u8; 8]> = (0..11).map(|i| (200i64 + i).to_le_bytes()).collect();
    let srcs: Vec<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
    assert_round_trip(&cif, &srcs);
}

#[test]
fn struct_split_across_boundary_round_trips() {
    let pair = Type::structure(vec![Type::sint64(), Type::sint64()]);
    let mut args = vec![Type::sint64(); 7];
    args.push(pair);
    let cif = CallDescriptor::new(Abi::Rv64Double, args, Type::void());

    let ints: Vec<[u8; 8]> = (0..7).map(|i| (i as i64).to_le_bytes()).collect();
    let mut pair_val = [0u8; 16];
    pair_val[..8].copy_from_slice(&0xaaaau64.to_le_bytes());
    pair_val[8..].copy_from_slice(&0xbbbbu64.to_le_bytes());
    let mut srcs: Vec<&[u8]> = ints.iter().map(|v| v.as_slice()).collect();
    srcs.push(&pair_val);
    assert_round_trip(&cif, &srcs);
}

#[test]
fn variadic_doubles_round_trip_through_integer_slots() {
    let args = vec![Type::pointer(), Type::double(), Type::sint32()];
    let cif = CallDescriptor::new_variadic(Abi::Rv64Double, args, Type::sint32(), 1);

    let p = 0x5000u64.to_le_bytes();
    let d = 3.125f64.to_le_bytes();
    let i = 17i32.to_le_bytes();
    assert_round_trip(&cif, &[&p, &d, &i]);
}

#[test]
fn long_double_round_trips() {
    let args = vec![Type::sint64(), Type::longdouble()];
    let cif = CallDescriptor::new(Abi::Rv64Double, args, Type::void());

    let a = 3i64.to_le_bytes();
    let mut ld = [0u8; 16];
    ld[..8].copy_from_slice(&0x0123_4567_89ab_cdefu64.to_le_bytes());
    ld[8..].copy_from_slice(&0xfedc_ba98_7654_3210u64.to_le_bytes());
    assert_round_trip(&cif, &[&a, &ld]);
}

#[test]
fn variadic_long_double_round_trips() {
    let args = vec![Type::sint64(), Type::longdouble()];
    let cif = CallDescriptor::new_variadic(Abi::Rv64Double, args, Type::void(), 1);

    let a = 3i64.to_le_bytes();
    let ld = [0x5au8; 16];
    assert_round_trip(&cif, &[&a, &ld]);
}

#[test]
fn float_exhaustion_round_trips() {
    let args = vec![Type::double(); 9];
    let cif = CallDescriptor::new(Abi::Rv64Double, args, Type::void());

    let values: Vec<[u8; 8]> = (0..9).map(|i| (i as f64 + 0.5).to_le_bytes()).collect();
    let srcs: Vec<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
    assert_round_trip(&cif, &srcs);
}

#[test]
fn hidden_return_pointer_reaches_the_handler() {
    let big = Type::structure(vec![Type::uint64(); 3]);
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![Type::sint64()], big);
    assert!(cif.returns_via_pointer());

    let arg = 1i64.to_le_bytes();
    let avalues = [arg.as_ptr()];
    let mut ret_storage = [0u8; 24];
    let mut buf = vec![0u8; cif.bytes()];
    unsafe { marshal_args(&cif, ret_storage.as_mut_ptr(), &avalues, &mut buf) };

    let (ar, fpr) = capture(&cif, &buf);
    let mut cap = Captured { values: Vec::new(), ret_write: vec![0xab; 24] };
    let closure =
        Closure::new(&cif, capture_handler, &mut cap as *mut Captured as *mut c_void).unwrap();
    // rvalue argument is ignored; the real target arrives in ar[0].
    let kind =
        unsafe { closure_inner(&closure, core::ptr::null_mut(), ar.as_ptr(), fpr.as_ptr()) };

    assert_eq!(kind, 0);
    assert_eq!(cap.values[0], arg);
    assert!(ret_storage.iter().all(|&b| b == 0xab));
}

#[test]
fn return_kind_matches_descriptor_flags() {
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![], Type::double());
    let mut cap = Captured { values: Vec::new(), ret_write: Vec::new() };
    let closure =
        Closure::new(&cif, capture_handler, &mut cap as *mut Captured as *mut c_void).unwrap();
    let ar = [0u64; 8];
    let fpr = [0u64; 8];
    let mut ret = [0u8; 8];
    let kind = unsafe { closure_inner(&closure, ret.as_mut_ptr(), ar.as_ptr(), fpr.as_ptr()) };
    assert_eq!(kind, cif.return_kind());
    assert_eq!(kind, crate::types::TypeTag::Double.code());
}

#[test]
fn trampoline_install_writes_code_block() {
    let cif = CallDescriptor::new(Abi::Rv64Double, vec![], Type::void());
    let mut cap = Captured { values: Vec::new(), ret_write: Vec::new() };
    let closure =
        Closure::new(&cif, capture_handler, &mut cap as *mut Captured as *mut c_void).unwrap();
    let mut code = [0u32; TRAMPOLINE_WORDS];
    unsafe { closure.install(&mut code, 0x4000) };
    assert_ne!(code, [0u32; TRAMPOLINE_WORDS]);
    assert_eq!(code, synthesize(0x4000, Abi::Rv64Double));
}
